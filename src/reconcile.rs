//! Alias reconciliation and per-year coverage.
//!
//! Both ingestion paths land here: fixed-width extraction hands over a table
//! keyed by whatever names that year's declaration used, and pre-parsed
//! delimited exports are read into the same raw shape by [`read_delimited`].

use std::{fmt, fs::File, io::BufReader, path::Path};

use encoding_rs::Encoding;
use log::debug;
use serde::Serialize;

use crate::{
    data::{YearTable, parse_numeric_field},
    dialect::Dialect,
    error::{IngestError, IngestResult},
    io_utils,
};

/// How a canonical variable was found for one year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "via", rename_all = "kebab-case")]
pub enum Coverage {
    Direct,
    Alias(String),
    Missing,
}

impl Coverage {
    pub fn is_present(&self) -> bool {
        !matches!(self, Coverage::Missing)
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coverage::Direct => write!(f, "direct"),
            Coverage::Alias(name) => write!(f, "via {name}"),
            Coverage::Missing => write!(f, "missing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    pub fiscal_year: i32,
    pub variables: Vec<(String, Coverage)>,
}

impl CoverageReport {
    pub fn present(&self) -> impl Iterator<Item = &str> {
        self.variables
            .iter()
            .filter(|(_, coverage)| coverage.is_present())
            .map(|(name, _)| name.as_str())
    }

    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.variables
            .iter()
            .filter(|(_, coverage)| !coverage.is_present())
            .map(|(name, _)| name.as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.variables.iter().all(|(_, coverage)| coverage.is_present())
    }
}

/// Picks, per canonical variable, the source column that supplies it.
/// The canonical name always beats an alias; aliases are tried in order.
pub fn resolve_sources(available: &[String], dialect: &Dialect) -> Vec<(String, Coverage)> {
    dialect
        .variables
        .iter()
        .map(|canonical| {
            if available.iter().any(|name| name == canonical) {
                return (canonical.clone(), Coverage::Direct);
            }
            let alias = dialect
                .aliases_for(canonical)
                .iter()
                .find(|alias| available.iter().any(|name| name == *alias));
            match alias {
                Some(alias) => (canonical.clone(), Coverage::Alias(alias.clone())),
                None => (canonical.clone(), Coverage::Missing),
            }
        })
        .collect()
}

/// Renames alias columns to their canonical names and drops everything the
/// dialect does not name. Columns absent for the year stay absent here; the
/// assembler null-fills them.
pub fn reconcile(raw: YearTable, dialect: &Dialect) -> (YearTable, CoverageReport) {
    let variables = resolve_sources(&raw.columns, dialect);

    let mut columns = Vec::new();
    let mut picks = Vec::new();
    for (canonical, coverage) in &variables {
        let source = match coverage {
            Coverage::Direct => canonical.as_str(),
            Coverage::Alias(alias) => alias.as_str(),
            Coverage::Missing => continue,
        };
        if let Some(idx) = raw.column_index(source) {
            columns.push(canonical.clone());
            picks.push(idx);
        }
    }

    let rows = raw
        .rows
        .into_iter()
        .map(|row| {
            picks
                .iter()
                .map(|&idx| row.get(idx).copied().flatten())
                .collect()
        })
        .collect();

    let report = CoverageReport {
        fiscal_year: raw.fiscal_year,
        variables,
    };
    let table = YearTable {
        fiscal_year: raw.fiscal_year,
        columns,
        rows,
    };
    (table, report)
}

/// Reads a delimited export with a header row into a raw table holding only
/// the columns the dialect knows (canonical or alias), matched
/// case-insensitively. Values go through the same numeric coercion as
/// fixed-width fields.
pub fn read_delimited(
    path: &Path,
    delimiter: u8,
    fiscal_year: i32,
    dialect: &Dialect,
    encoding: &'static Encoding,
) -> IngestResult<YearTable> {
    let file = File::open(path).map_err(|err| IngestError::io(path, err))?;
    let mut reader = io_utils::open_csv_reader(BufReader::new(file), delimiter);
    let headers = reader
        .byte_headers()
        .map_err(|source| IngestError::Csv {
            path: path.to_path_buf(),
            source,
        })?
        .clone();
    let headers = io_utils::decode_record(&headers, encoding)
        .into_iter()
        .map(|header| header.trim().to_ascii_uppercase())
        .collect::<Vec<_>>();

    let wanted = dialect.source_names();
    let mut columns = Vec::new();
    let mut picks = Vec::new();
    for (idx, header) in headers.iter().enumerate() {
        if wanted.contains(header) && !columns.contains(header) {
            columns.push(header.clone());
            picks.push(idx);
        }
    }
    debug!(
        "{:?}: {} of {} header(s) retained",
        path,
        columns.len(),
        headers.len()
    );

    let mut table = YearTable::new(fiscal_year, columns);
    let mut record = csv::ByteRecord::new();
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(source) => {
                return Err(IngestError::Csv {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
        let row = picks
            .iter()
            .map(|&idx| {
                record
                    .get(idx)
                    .and_then(|field| parse_numeric_field(&io_utils::decode_lossy(field, encoding)))
            })
            .collect();
        table.rows.push(row);
    }
    if table.rows.is_empty() {
        return Err(IngestError::EmptyData {
            path: path.to_path_buf(),
        });
    }
    Ok(table)
}
