use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::dialect::WidthPolicy;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Ingest multi-year fixed-width sentencing records into one dataset",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Parse, extract and reconcile every fiscal year, then write the unified CSV
    Ingest(IngestArgs),
    /// Print the byte ranges a declaration file resolves to
    Layout(LayoutArgs),
    /// Summarize per-year row counts and key-variable coverage of a unified CSV
    Coverage(CoverageArgs),
    /// Produce code-book-labelled value counts for columns of a unified CSV
    Frequency(FrequencyArgs),
    /// Write the built-in dialect as YAML for editing
    Dialect(DialectArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// YAML plan listing each fiscal year's source
    #[arg(short, long, conflicts_with = "data_dir")]
    pub plan: Option<PathBuf>,
    /// Directory searched by naming convention when no plan is given
    #[arg(short = 'd', long = "data-dir", requires_all = ["from", "to"])]
    pub data_dir: Option<PathBuf>,
    /// First fiscal year to discover (inclusive)
    #[arg(long)]
    pub from: Option<i32>,
    /// Last fiscal year to discover (inclusive)
    #[arg(long)]
    pub to: Option<i32>,
    /// Output CSV path (overrides the plan's output)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Dialect YAML (overrides the plan's dialect)
    #[arg(long)]
    pub dialect: Option<PathBuf>,
    /// Character encoding of declarations and data files (defaults to windows-1252)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Override the dialect's handling of single-position fields with no width
    #[arg(long = "width-policy", value_enum)]
    pub width_policy: Option<WidthPolicyArg>,
    /// Number of years processed concurrently (1 = sequential, default all cores)
    #[arg(short, long)]
    pub jobs: Option<usize>,
    /// Write the run report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct LayoutArgs {
    /// SAS declaration file to parse
    #[arg(short, long)]
    pub input: PathBuf,
    /// Dialect YAML used for the usability check
    #[arg(long)]
    pub dialect: Option<PathBuf>,
    /// Character encoding of the declaration (defaults to windows-1252)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Handling of single-position fields with no width
    #[arg(long = "width-policy", value_enum)]
    pub width_policy: Option<WidthPolicyArg>,
    /// Only list variables the dialect uses
    #[arg(long = "dialect-only")]
    pub dialect_only: bool,
}

#[derive(Debug, Args)]
pub struct CoverageArgs {
    /// Unified CSV produced by `ingest`
    #[arg(short, long)]
    pub input: PathBuf,
    /// Dialect YAML naming the key variables to report
    #[arg(long)]
    pub dialect: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct FrequencyArgs {
    /// Unified CSV produced by `ingest`
    #[arg(short, long)]
    pub input: PathBuf,
    /// Columns to count (defaults to every column with a code book)
    #[arg(short = 'C', long = "columns", value_delimiter = ',')]
    pub columns: Vec<String>,
    /// Maximum distinct values shown per column and year (0 = all)
    #[arg(long, default_value_t = 0)]
    pub top: usize,
    /// Pool counts across fiscal years
    #[arg(long)]
    pub pooled: bool,
}

#[derive(Debug, Args)]
pub struct DialectArgs {
    /// Destination YAML file
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WidthPolicyArg {
    /// Drop the field for that year
    Reject,
    /// Assume a one-byte field
    DefaultOne,
}

impl From<WidthPolicyArg> for WidthPolicy {
    fn from(value: WidthPolicyArg) -> Self {
        match value {
            WidthPolicyArg::Reject => WidthPolicy::Reject,
            WidthPolicyArg::DefaultOne => WidthPolicy::DefaultOne,
        }
    }
}
