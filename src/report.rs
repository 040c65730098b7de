//! Per-year diagnostics and coverage summaries.

use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::BufWriter,
    path::Path,
};

use anyhow::{Context, Result};
use encoding_rs::UTF_8;
use itertools::Itertools;
use log::{info, warn};
use serde::Serialize;

use crate::{
    assemble::{AssemblySummary, PersistSummary, YearSummary, percent},
    data::{Value, parse_numeric_field},
    dialect::{Dialect, FISCAL_YEAR_COLUMN},
    io_utils,
    pipeline::YearOutcome,
    reconcile::Coverage,
    table::TextTable,
};

/// How much of a year made it into the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Fidelity {
    /// Every canonical variable was found.
    Full,
    /// Included, with some canonical variables null for the whole year.
    Reduced,
    Dropped,
}

impl Fidelity {
    pub fn label(self) -> &'static str {
        match self {
            Fidelity::Full => "full",
            Fidelity::Reduced => "reduced",
            Fidelity::Dropped => "dropped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearDiagnostic {
    pub fiscal_year: i32,
    pub source: String,
    pub fidelity: Fidelity,
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_fields: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_records: Option<usize>,
    pub present: Vec<String>,
    pub missing: Vec<String>,
    /// Canonical name paired with the historical name that supplied it.
    pub aliased: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl YearDiagnostic {
    pub fn from_outcome(outcome: &YearOutcome) -> Self {
        match &outcome.result {
            Ok(included) => {
                let coverage = &included.coverage;
                let missing = coverage.missing().map(str::to_string).collect::<Vec<_>>();
                let aliased = coverage
                    .variables
                    .iter()
                    .filter_map(|(canonical, status)| match status {
                        Coverage::Alias(alias) => Some((canonical.clone(), alias.clone())),
                        _ => None,
                    })
                    .collect();
                Self {
                    fiscal_year: outcome.fiscal_year,
                    source: outcome.source.clone(),
                    fidelity: if coverage.is_complete() {
                        Fidelity::Full
                    } else {
                        Fidelity::Reduced
                    },
                    rows: included.table.row_count(),
                    layout_fields: included.layout_fields,
                    short_records: included.extract.map(|summary| summary.short_records),
                    present: coverage.present().map(str::to_string).collect(),
                    missing,
                    aliased,
                    error_kind: None,
                    reason: None,
                }
            }
            Err(err) => Self {
                fiscal_year: outcome.fiscal_year,
                source: outcome.source.clone(),
                fidelity: Fidelity::Dropped,
                rows: 0,
                layout_fields: None,
                short_records: None,
                present: Vec::new(),
                missing: Vec::new(),
                aliased: Vec::new(),
                error_kind: Some(err.kind()),
                reason: Some(err.to_string()),
            },
        }
    }

    pub fn log(&self) {
        let year = self.fiscal_year;
        let total = self.present.len() + self.missing.len();
        match self.fidelity {
            Fidelity::Full => info!(
                "FY{year}: included, {} row(s), {}/{} variables from {}",
                self.rows,
                self.present.len(),
                total,
                self.source
            ),
            Fidelity::Reduced => warn!(
                "FY{year}: included at reduced fidelity, {} row(s), {}/{} variables; null for the year: {}",
                self.rows,
                self.present.len(),
                total,
                self.missing.join(", ")
            ),
            Fidelity::Dropped => warn!(
                "FY{year}: excluded ({}): {}",
                self.error_kind.unwrap_or("unknown"),
                self.reason.as_deref().unwrap_or_default()
            ),
        }
        for (canonical, alias) in &self.aliased {
            info!("FY{year}: {canonical} read from {alias}");
        }
    }

    fn table_row(&self) -> Vec<String> {
        let detail = match self.fidelity {
            Fidelity::Dropped => self.reason.clone().unwrap_or_default(),
            _ if self.missing.is_empty() => String::new(),
            _ => format!("missing {}", self.missing.join(", ")),
        };
        vec![
            self.fiscal_year.to_string(),
            self.fidelity.label().to_string(),
            self.rows.to_string(),
            format!("{}/{}", self.present.len(), self.present.len() + self.missing.len()),
            detail,
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub dialect: String,
    pub output: PersistSummary,
    pub summary: AssemblySummary,
    pub years: Vec<YearDiagnostic>,
}

impl RunReport {
    pub fn included_years(&self) -> usize {
        self.years
            .iter()
            .filter(|year| year.fidelity != Fidelity::Dropped)
            .count()
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating report {path:?}"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Writing report {path:?}"))
    }

    pub fn render(&self) -> String {
        let mut years = TextTable::new(["year", "fidelity", "rows", "variables", "detail"])
            .align_right(&["rows", "variables"]);
        for diagnostic in &self.years {
            years.push_row(diagnostic.table_row());
        }
        format!("{}\n{}", years.render(), render_summary(&self.summary))
    }
}

/// Row counts and key-variable coverage, one line per year.
pub fn render_summary(summary: &AssemblySummary) -> String {
    let mut headers = vec!["year".to_string(), "rows".to_string()];
    headers.extend(summary.variables.iter().map(|variable| format!("{variable} %")));
    let right = headers.iter().skip(1).map(String::as_str).collect::<Vec<_>>();
    let mut table = TextTable::new(headers.clone()).align_right(&right);
    for year in &summary.years {
        let mut row = vec![year.fiscal_year.to_string(), year.rows.to_string()];
        row.extend(year.coverage.iter().map(|(_, pct)| format!("{pct:.1}")));
        table.push_row(row);
    }
    format!("{}total rows: {}\n", table.render(), summary.total_rows)
}

/// Recomputes the coverage summary from a unified artifact on disk.
pub fn coverage_from_csv(input: &Path, dialect: &Dialect) -> Result<AssemblySummary> {
    let mut reader = io_utils::open_csv_reader_from_path(input, io_utils::DEFAULT_CSV_DELIMITER)
        .with_context(|| format!("Opening {input:?}"))?;
    let headers = io_utils::reader_headers(&mut reader, UTF_8)?;
    let lookup = headers
        .iter()
        .enumerate()
        .map(|(idx, header)| (header.trim().to_ascii_uppercase(), idx))
        .collect::<HashMap<_, _>>();
    let year_idx = *lookup
        .get(FISCAL_YEAR_COLUMN)
        .with_context(|| format!("{input:?} has no {FISCAL_YEAR_COLUMN} column"))?;

    let variables = dialect.reported_variables().to_vec();
    let picks = variables
        .iter()
        .map(|variable| lookup.get(variable).copied())
        .collect::<Vec<_>>();
    for (variable, pick) in variables.iter().zip(&picks) {
        if pick.is_none() {
            warn!("{input:?} has no {variable} column; reported as 0% for every year");
        }
    }

    // year -> (rows, non-null count per variable)
    let mut tallies: BTreeMap<i32, (usize, Vec<usize>)> = BTreeMap::new();
    for (row_idx, record) in reader.byte_records().enumerate() {
        let record = record.with_context(|| format!("Reading row {}", row_idx + 2))?;
        let year = record
            .get(year_idx)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(parse_numeric_field);
        let Some(Value::Integer(year)) = year else {
            warn!("Row {} has no usable {FISCAL_YEAR_COLUMN}; skipped", row_idx + 2);
            continue;
        };
        let Ok(year) = i32::try_from(year) else {
            continue;
        };
        let tally = tallies
            .entry(year)
            .or_insert_with(|| (0, vec![0; variables.len()]));
        tally.0 += 1;
        for (count, pick) in tally.1.iter_mut().zip(&picks) {
            let present = pick
                .and_then(|idx| record.get(idx))
                .is_some_and(|raw| !raw.iter().all(u8::is_ascii_whitespace));
            if present {
                *count += 1;
            }
        }
    }

    let years = tallies
        .into_iter()
        .map(|(fiscal_year, (rows, counts))| YearSummary {
            fiscal_year,
            rows,
            coverage: variables
                .iter()
                .cloned()
                .zip_eq(counts)
                .map(|(variable, count)| (variable, percent(count, rows)))
                .collect(),
        })
        .collect::<Vec<_>>();
    Ok(AssemblySummary {
        total_rows: years.iter().map(|year| year.rows).sum(),
        variables,
        years,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::YearTable,
        error::IngestError,
        pipeline::IncludedYear,
        reconcile::CoverageReport,
    };

    fn included(missing: &[&str]) -> YearOutcome {
        let variables = ["SENTTOT", "DSPLEA", "OFFGUIDE"]
            .iter()
            .map(|name| {
                let status = if missing.contains(name) {
                    Coverage::Missing
                } else if *name == "OFFGUIDE" {
                    Coverage::Alias("OFFTYPE2".to_string())
                } else {
                    Coverage::Direct
                };
                (name.to_string(), status)
            })
            .collect();
        YearOutcome {
            fiscal_year: 2004,
            source: "archive opafy04nid.zip".to_string(),
            result: Ok(IncludedYear {
                table: YearTable::new(2004, Vec::new()),
                coverage: CoverageReport {
                    fiscal_year: 2004,
                    variables,
                },
                layout_fields: Some(3),
                extract: None,
            }),
        }
    }

    #[test]
    fn diagnostic_distinguishes_full_reduced_and_dropped() {
        let full = YearDiagnostic::from_outcome(&included(&[]));
        assert_eq!(full.fidelity, Fidelity::Full);
        assert_eq!(
            full.aliased,
            vec![("OFFGUIDE".to_string(), "OFFTYPE2".to_string())]
        );

        let reduced = YearDiagnostic::from_outcome(&included(&["DSPLEA"]));
        assert_eq!(reduced.fidelity, Fidelity::Reduced);
        assert_eq!(reduced.missing, vec!["DSPLEA".to_string()]);

        let dropped = YearDiagnostic::from_outcome(&YearOutcome {
            fiscal_year: 2001,
            source: "fixed-width opafy01nid.dat".to_string(),
            result: Err(IngestError::NoDeclaration {
                origin: "opafy01nid.sas".to_string(),
            }),
        });
        assert_eq!(dropped.fidelity, Fidelity::Dropped);
        assert_eq!(dropped.error_kind, Some("no-declaration"));
    }

    #[test]
    fn dropped_year_serializes_reason() {
        let dropped = YearDiagnostic::from_outcome(&YearOutcome {
            fiscal_year: 2001,
            source: "nothing found".to_string(),
            result: Err(IngestError::NoUsableYears),
        });
        let json = serde_json::to_value(&dropped).unwrap();
        assert_eq!(json["fidelity"], "dropped");
        assert_eq!(json["error_kind"], "no-usable-years");
        assert!(json.get("layout_fields").is_none());
    }
}
