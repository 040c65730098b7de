//! Unified dataset assembly and persistence.
//!
//! Reconciled per-year tables are conformed to the dialect's full canonical
//! column set (absent columns become all-null), ordered by fiscal year, and
//! written as one CSV. The write goes to a sibling `.partial` file first and
//! is renamed over the destination, so a rerun either fully replaces the
//! previous artifact or leaves it untouched.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use serde::Serialize;

use crate::{
    data::{Cell, YearTable, render_cell},
    dialect::Dialect,
    error::{IngestError, IngestResult},
    io_utils::{self, DigestWriter},
};

#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedDataset {
    variables: Vec<String>,
    header: Vec<String>,
    years: Vec<YearTable>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearSummary {
    pub fiscal_year: i32,
    pub rows: usize,
    /// Non-null percentage per reported variable, in dialect order.
    pub coverage: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssemblySummary {
    pub total_rows: usize,
    pub variables: Vec<String>,
    pub years: Vec<YearSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub bytes: u64,
    pub sha256: String,
}

/// Conforms a table to `variables`, filling columns it lacks with nulls.
fn conform(table: YearTable, variables: &[String]) -> YearTable {
    if table.columns == variables {
        return table;
    }
    let picks = variables
        .iter()
        .map(|variable| table.column_index(variable))
        .collect::<Vec<_>>();
    let rows = table
        .rows
        .into_iter()
        .map(|row| {
            picks
                .iter()
                .map(|pick| pick.and_then(|idx| row.get(idx).copied().flatten()))
                .collect::<Vec<Cell>>()
        })
        .collect();
    YearTable {
        fiscal_year: table.fiscal_year,
        columns: variables.to_vec(),
        rows,
    }
}

/// Builds the unified dataset. Fails only when no table holds a single row.
pub fn assemble(tables: Vec<YearTable>, dialect: &Dialect) -> IngestResult<UnifiedDataset> {
    let variables = dialect.variables.clone();
    let mut years = tables
        .into_iter()
        .map(|table| conform(table, &variables))
        .collect::<Vec<_>>();
    years.sort_by_key(|table| table.fiscal_year);
    if years.iter().all(|table| table.rows.is_empty()) {
        return Err(IngestError::NoUsableYears);
    }
    Ok(UnifiedDataset {
        variables,
        header: dialect.output_columns(),
        years,
    })
}

impl UnifiedDataset {
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Output header: every canonical variable, then the fiscal-year tag.
    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn years(&self) -> &[YearTable] {
        &self.years
    }

    pub fn row_count(&self) -> usize {
        self.years.iter().map(YearTable::row_count).sum()
    }

    pub fn summary(&self, dialect: &Dialect) -> AssemblySummary {
        let variables = dialect.reported_variables().to_vec();
        let years = self
            .years
            .iter()
            .map(|table| YearSummary {
                fiscal_year: table.fiscal_year,
                rows: table.row_count(),
                coverage: variables
                    .iter()
                    .map(|variable| {
                        (
                            variable.clone(),
                            percent(table.non_null_count(variable), table.row_count()),
                        )
                    })
                    .collect(),
            })
            .collect();
        AssemblySummary {
            total_rows: self.row_count(),
            variables,
            years,
        }
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<W> {
        let mut csv_writer = io_utils::open_csv_writer(writer);
        csv_writer
            .write_record(self.header())
            .context("Writing header row")?;
        let mut record = Vec::with_capacity(self.variables.len() + 1);
        for table in &self.years {
            let tag = table.fiscal_year.to_string();
            for row in &table.rows {
                record.clear();
                record.extend(row.iter().map(render_cell));
                record.push(tag.clone());
                csv_writer
                    .write_record(&record)
                    .with_context(|| format!("Writing FY{} row", table.fiscal_year))?;
            }
        }
        csv_writer
            .into_inner()
            .map_err(|err| anyhow!("Flushing CSV output: {}", err.error()))
    }

    /// Replaces `path` with the dataset, returning the digest of the bytes written.
    pub fn persist(&self, path: &Path) -> Result<PersistSummary> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Creating output directory {parent:?}"))?;
        }
        let partial = partial_path(path);
        let result = self.write_partial(&partial);
        let (bytes, sha256) = match result {
            Ok(done) => done,
            Err(err) => {
                let _ = fs::remove_file(&partial);
                return Err(err);
            }
        };
        fs::rename(&partial, path)
            .with_context(|| format!("Moving {partial:?} over {path:?}"))?;
        info!(
            "Wrote {} row(s), {} byte(s) to {:?} (sha256 {})",
            self.row_count(),
            bytes,
            path,
            sha256
        );
        Ok(PersistSummary {
            path: path.to_path_buf(),
            rows: self.row_count(),
            bytes,
            sha256,
        })
    }

    fn write_partial(&self, partial: &Path) -> Result<(u64, String)> {
        debug!("Staging dataset at {partial:?}");
        let file =
            File::create(partial).with_context(|| format!("Creating output file {partial:?}"))?;
        let digest = self.write_csv(DigestWriter::new(BufWriter::new(file)))?;
        let (buffered, sha256, bytes) = digest.finish();
        let file = buffered
            .into_inner()
            .map_err(|err| anyhow!("Flushing {partial:?}: {}", err.error()))?;
        file.sync_all()
            .with_context(|| format!("Syncing {partial:?}"))?;
        Ok((bytes, sha256))
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

pub(crate) fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
