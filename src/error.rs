//! Failure taxonomy for a single fiscal year's ingestion.
//!
//! Every variant except [`IngestError::NoUsableYears`] is local to one year:
//! the pipeline records it against that year, excludes the year, and moves
//! on. `NoUsableYears` is the only run-level failure.

use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no INPUT statement found in declaration {origin}")]
    NoDeclaration { origin: String },

    #[error("declaration resolved only {resolved} of the {required} variables required")]
    TooFewVariables { resolved: usize, required: usize },

    #[error("missing {what} for fiscal year {fiscal_year}")]
    MissingArtifact { fiscal_year: i32, what: String },

    #[error("data file {path:?} holds no records")]
    EmptyData { path: PathBuf },

    #[error("archive {path:?} is unusable: {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error("reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parsing delimited table {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("no fiscal year produced usable data")]
    NoUsableYears,
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn archive(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IngestError::Archive {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-friendly label used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::NoDeclaration { .. } => "no-declaration",
            IngestError::TooFewVariables { .. } => "too-few-variables",
            IngestError::MissingArtifact { .. } => "missing-artifact",
            IngestError::EmptyData { .. } => "empty-data",
            IngestError::Archive { .. } => "malformed-archive",
            IngestError::Io { .. } => "io",
            IngestError::Csv { .. } => "csv",
            IngestError::NoUsableYears => "no-usable-years",
        }
    }
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;
