//! Fan-out/fan-in orchestration.
//!
//! Every year is parsed, extracted and reconciled on its own; a failing year
//! becomes an excluded [`YearOutcome`] and never stops the others. Only when
//! all years have finished are the tables concatenated, always in ascending
//! fiscal-year order no matter which worker finished first.

use std::{
    collections::BTreeSet,
    fs,
    ops::RangeInclusive,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, ensure};
use encoding_rs::Encoding;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    assemble,
    data::YearTable,
    dialect::Dialect,
    error::IngestError,
    extract::ExtractSummary,
    reconcile::{self, CoverageReport},
    report::{RunReport, YearDiagnostic},
    source::{self, YearSource},
};

/// A YAML manifest naming the output and where each year comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestPlan {
    pub output: PathBuf,
    /// Encoding label for declarations and data; windows-1252 when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Dialect file; the built-in dialect when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<PathBuf>,
    pub years: Vec<YearSource>,
}

impl IngestPlan {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("Reading plan {path:?}"))?;
        let mut plan: IngestPlan =
            serde_yaml::from_str(&text).with_context(|| format!("Parsing plan {path:?}"))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        plan.rebase(base);
        plan.validate()?;
        Ok(plan)
    }

    /// Builds a plan by probing `data_dir` for each year in `years`.
    pub fn discover(data_dir: &Path, years: RangeInclusive<i32>, output: PathBuf) -> Result<Self> {
        ensure!(
            data_dir.is_dir(),
            "Data directory {data_dir:?} does not exist"
        );
        ensure!(!years.is_empty(), "Year range {years:?} is empty");
        let plan = Self {
            output,
            encoding: None,
            dialect: None,
            years: source::discover(data_dir, years),
        };
        plan.validate()?;
        Ok(plan)
    }

    fn rebase(&mut self, base: &Path) {
        if self.output.is_relative() {
            self.output = base.join(&self.output);
        }
        if let Some(dialect) = self.dialect.as_mut()
            && dialect.is_relative()
        {
            *dialect = base.join(&*dialect);
        }
        for year in &mut self.years {
            if let Some(source) = year.source.as_mut() {
                source.rebase(base);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.years.is_empty(), "Plan lists no fiscal years");
        let mut seen = BTreeSet::new();
        for year in &self.years {
            ensure!(
                seen.insert(year.fiscal_year),
                "Fiscal year {} appears more than once in the plan",
                year.fiscal_year
            );
        }
        Ok(())
    }

    pub fn resolve_dialect(&self) -> Result<Dialect> {
        match &self.dialect {
            Some(path) => Dialect::load(path),
            None => Ok(Dialect::default()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub encoding: &'static Encoding,
    /// Worker count; `Some(1)` runs sequentially, `None` uses every core.
    pub jobs: Option<usize>,
}

/// A year that produced a reconciled table.
#[derive(Debug, Clone)]
pub struct IncludedYear {
    pub table: YearTable,
    pub coverage: CoverageReport,
    pub layout_fields: Option<usize>,
    pub extract: Option<ExtractSummary>,
}

#[derive(Debug)]
pub struct YearOutcome {
    pub fiscal_year: i32,
    pub source: String,
    pub result: Result<IncludedYear, IngestError>,
}

/// Parse, extract and reconcile one year.
pub fn ingest_year(year: &YearSource, dialect: &Dialect, encoding: &'static Encoding) -> YearOutcome {
    let source = year
        .source
        .as_ref()
        .map(|spec| spec.describe())
        .unwrap_or_else(|| "nothing found".to_string());
    debug!("FY{}: reading {}", year.fiscal_year, source);
    let result = year.load(dialect, encoding).map(|loaded| {
        let (table, coverage) = reconcile::reconcile(loaded.table, dialect);
        IncludedYear {
            table,
            coverage,
            layout_fields: loaded.layout_fields,
            extract: loaded.extract,
        }
    });
    YearOutcome {
        fiscal_year: year.fiscal_year,
        source,
        result,
    }
}

/// Ingests every year, in parallel unless `jobs` is 1, and returns the
/// outcomes sorted by fiscal year.
pub fn ingest_all(years: &[YearSource], dialect: &Dialect, options: RunOptions) -> Result<Vec<YearOutcome>> {
    let work = |year: &YearSource| ingest_year(year, dialect, options.encoding);
    let mut outcomes = match options.jobs {
        Some(0) => return Err(anyhow!("--jobs must be at least 1")),
        Some(1) => years.iter().map(work).collect::<Vec<_>>(),
        Some(threads) => rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .context("Building worker pool")?
            .install(|| years.par_iter().map(work).collect::<Vec<_>>()),
        None => years.par_iter().map(work).collect::<Vec<_>>(),
    };
    outcomes.sort_by_key(|outcome| outcome.fiscal_year);
    Ok(outcomes)
}

/// Runs the whole plan: ingest, report per year, assemble, persist.
pub fn run(plan: &IngestPlan, dialect: &Dialect, options: RunOptions) -> Result<RunReport> {
    info!(
        "Ingesting {} fiscal year(s) with dialect '{}'",
        plan.years.len(),
        dialect.name
    );
    let outcomes = ingest_all(&plan.years, dialect, options)?;

    let diagnostics = outcomes
        .iter()
        .map(YearDiagnostic::from_outcome)
        .collect::<Vec<_>>();
    for diagnostic in &diagnostics {
        diagnostic.log();
    }

    let tables = outcomes
        .into_iter()
        .filter_map(|outcome| outcome.result.ok())
        .map(|included| included.table)
        .collect::<Vec<_>>();
    let dataset = assemble::assemble(tables, dialect)
        .with_context(|| format!("Nothing to write to {:?}", plan.output))?;
    let output = dataset
        .persist(&plan.output)
        .with_context(|| format!("Persisting dataset to {:?}", plan.output))?;
    let summary = dataset.summary(dialect);

    Ok(RunReport {
        dialect: dialect.name.clone(),
        output,
        summary,
        years: diagnostics,
    })
}
