pub mod assemble;
pub mod cli;
pub mod data;
pub mod dialect;
pub mod error;
pub mod extract;
pub mod frequency;
pub mod io_utils;
pub mod layout;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod source;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, info, warn};

use crate::{
    cli::{Cli, Commands},
    dialect::Dialect,
    layout::ColumnLayout,
    pipeline::{IngestPlan, RunOptions},
    table::TextTable,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sentencing_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => handle_ingest(&args),
        Commands::Layout(args) => handle_layout(&args),
        Commands::Coverage(args) => handle_coverage(&args),
        Commands::Frequency(args) => frequency::execute(&args),
        Commands::Dialect(args) => handle_dialect(&args),
    }
}

fn load_dialect(path: Option<&std::path::Path>) -> Result<Dialect> {
    match path {
        Some(path) => {
            Dialect::load(path).with_context(|| format!("Loading dialect from {path:?}"))
        }
        None => Ok(Dialect::default()),
    }
}

fn handle_ingest(args: &cli::IngestArgs) -> Result<()> {
    let mut plan = match (&args.plan, &args.data_dir) {
        (Some(path), _) => {
            IngestPlan::load(path).with_context(|| format!("Loading plan {path:?}"))?
        }
        (None, Some(data_dir)) => {
            let (Some(from), Some(to)) = (args.from, args.to) else {
                bail!("--data-dir needs both --from and --to");
            };
            let output = args
                .output
                .clone()
                .unwrap_or_else(|| data_dir.join("combined.csv"));
            IngestPlan::discover(data_dir, from..=to, output)?
        }
        (None, None) => bail!("Provide either --plan or --data-dir with --from/--to"),
    };
    if let Some(output) = &args.output {
        plan.output = output.clone();
    }
    if let Some(dialect) = &args.dialect {
        plan.dialect = Some(dialect.clone());
    }

    let mut dialect = plan.resolve_dialect()?;
    if let Some(policy) = args.width_policy {
        dialect.width_policy = policy.into();
    }
    let encoding_label = args.input_encoding.as_deref().or(plan.encoding.as_deref());
    let options = RunOptions {
        encoding: io_utils::resolve_encoding(encoding_label)?,
        jobs: args.jobs,
    };
    info!(
        "Reading inputs as {} into {:?}",
        options.encoding.name(),
        plan.output
    );

    let report = pipeline::run(&plan, &dialect, options)?;
    print!("{}", report.render());
    if let Some(path) = &args.report {
        report.save_json(path)?;
        info!("Run report written to {path:?}");
    }
    info!(
        "{} of {} fiscal year(s) included, {} row(s) total",
        report.included_years(),
        report.years.len(),
        report.summary.total_rows
    );
    Ok(())
}

fn handle_layout(args: &cli::LayoutArgs) -> Result<()> {
    let mut dialect = load_dialect(args.dialect.as_deref())?;
    if let Some(policy) = args.width_policy {
        dialect.width_policy = policy.into();
    }
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let layout = ColumnLayout::from_path(&args.input, encoding, dialect.width_policy)
        .with_context(|| format!("Parsing declaration {:?}", args.input))?;

    let wanted = dialect.source_names();
    let mut fields = layout
        .fields()
        .filter(|(name, _)| !args.dialect_only || wanted.iter().any(|w| w.as_str() == *name))
        .collect::<Vec<_>>();
    fields.sort_by_key(|(name, spec)| (spec.range, *name));

    let mut table = TextTable::new(["variable", "columns", "width", "source"])
        .align_right(&["columns", "width"]);
    for (name, spec) in fields {
        table.push_row(vec![
            name.to_string(),
            spec.range.to_string(),
            spec.range.width().to_string(),
            spec.source.label().to_string(),
        ]);
    }
    table.print();

    for name in layout.unresolved() {
        warn!("'{name}' has a single column position and no discoverable width");
    }
    match layout.ensure_usable(&dialect) {
        Ok(()) => info!(
            "{} field(s) declared over {} byte(s), {} of {} dialect variable(s) resolved",
            layout.len(),
            layout.max_end(),
            layout.resolved_count(&dialect),
            dialect.variables.len()
        ),
        Err(err) => warn!("Declaration would be excluded: {err}"),
    }
    Ok(())
}

fn handle_coverage(args: &cli::CoverageArgs) -> Result<()> {
    let dialect = load_dialect(args.dialect.as_deref())?;
    let summary = report::coverage_from_csv(&args.input, &dialect)
        .with_context(|| format!("Summarizing {:?}", args.input))?;
    print!("{}", report::render_summary(&summary));
    Ok(())
}

fn handle_dialect(args: &cli::DialectArgs) -> Result<()> {
    let dialect = Dialect::default();
    dialect
        .save(&args.output)
        .with_context(|| format!("Writing dialect to {:?}", args.output))?;
    info!(
        "Dialect '{}' with {} variable(s) written to {:?}",
        dialect.name,
        dialect.variables.len(),
        args.output
    );
    Ok(())
}
