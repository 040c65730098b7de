//! Code-book-labelled value counts over a unified artifact.
//!
//! Counts are kept per fiscal year so a code that only appears in some
//! vintages (for instance multiracial `7`) shows up where it belongs.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::UTF_8;
use log::info;

use crate::{
    cli::FrequencyArgs,
    data::{Cell, Value, parse_numeric_field},
    dialect::FISCAL_YEAR_COLUMN,
    io_utils,
    table::TextTable,
};

/// Published labels for one categorical variable.
#[derive(Debug, Clone, Copy)]
pub struct Codebook {
    pub variable: &'static str,
    pub labels: &'static [(i64, &'static str)],
}

const CODEBOOKS: &[Codebook] = &[
    Codebook {
        variable: "NEWRACE",
        labels: &[
            (1, "White"),
            (2, "Black"),
            (3, "Hispanic"),
            (4, "Other"),
            (7, "Multiracial"),
        ],
    },
    Codebook {
        variable: "MONSEX",
        labels: &[(0, "Male"), (1, "Female")],
    },
    Codebook {
        variable: "CITIZEN",
        labels: &[
            (1, "US Citizen"),
            (2, "Legal Alien"),
            (3, "Illegal Alien"),
            (4, "Unknown Alien"),
            (5, "Extradited"),
        ],
    },
    Codebook {
        variable: "NEWEDUC",
        labels: &[
            (1, "Less than HS"),
            (3, "HS Graduate"),
            (5, "Some College"),
            (6, "College Graduate"),
        ],
    },
    Codebook {
        variable: "DSPLEA",
        labels: &[
            (0, "Not Received"),
            (1, "Plea Agreement"),
            (2, "Alternative Document"),
            (3, "Oral Plea"),
            (5, "Straight Plea"),
            (8, "Trial"),
            (9, "Guilty, Type Unknown"),
        ],
    },
    Codebook {
        variable: "OFFGUIDE",
        labels: &[
            (1, "Administration of Justice"),
            (2, "Antitrust"),
            (3, "Arson"),
            (4, "Assault"),
            (5, "Bribery/Corruption"),
            (6, "Burglary/Trespass"),
            (7, "Child Pornography"),
            (8, "Commercialized Vice"),
            (9, "Drug Possession"),
            (10, "Drug Trafficking"),
            (11, "Environmental"),
            (12, "Extortion/Racketeering"),
            (13, "Firearms"),
            (14, "Food and Drug"),
            (15, "Forgery/Counterfeiting"),
            (16, "Fraud/Theft/Embezzlement"),
            (17, "Immigration"),
            (18, "Individual Rights"),
            (19, "Kidnapping"),
            (20, "Manslaughter"),
            (21, "Money Laundering"),
            (22, "Murder"),
            (23, "National Defense"),
            (24, "Obscenity/Other Sex Offenses"),
            (25, "Prison Offenses"),
            (26, "Robbery"),
            (27, "Sexual Abuse"),
            (28, "Stalking/Harassing"),
            (29, "Tax"),
            (30, "Other"),
        ],
    },
];

pub fn codebook(variable: &str) -> Option<&'static Codebook> {
    CODEBOOKS
        .iter()
        .find(|book| book.variable.eq_ignore_ascii_case(variable))
}

impl Codebook {
    pub fn label(&self, value: &Value) -> Option<&'static str> {
        let Value::Integer(code) = value else {
            return None;
        };
        self.labels
            .iter()
            .find(|(candidate, _)| candidate == code)
            .map(|(_, label)| *label)
    }
}

/// Human label for a cell: the code-book entry when one exists, otherwise
/// a marker that keeps undocumented codes visible rather than dropping them.
pub fn describe(variable: &str, cell: &Cell) -> String {
    match cell {
        None => "<missing>".to_string(),
        Some(value) => match codebook(variable).and_then(|book| book.label(value)) {
            Some(label) => label.to_string(),
            None if codebook(variable).is_some() => "<not in code book>".to_string(),
            None => String::new(),
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyRow {
    pub variable: String,
    /// `None` when counts are pooled across years.
    pub fiscal_year: Option<i32>,
    pub value: Cell,
    pub label: String,
    pub count: usize,
    pub percent: f64,
}

impl FrequencyRow {
    pub fn to_strings(&self) -> Vec<String> {
        vec![
            self.variable.clone(),
            self.fiscal_year
                .map(|year| year.to_string())
                .unwrap_or_else(|| "all".to_string()),
            crate::data::render_cell(&self.value),
            self.label.clone(),
            self.count.to_string(),
            format!("{:.2}%", self.percent),
        ]
    }
}

type Counts = BTreeMap<Cell, usize>;

#[derive(Debug, Default)]
struct FrequencyAccumulator {
    /// Per variable: year (or `None` when pooled) -> value -> count.
    counts: Vec<(String, BTreeMap<Option<i32>, Counts>)>,
    pooled: bool,
}

impl FrequencyAccumulator {
    fn new(variables: &[String], pooled: bool) -> Self {
        Self {
            counts: variables
                .iter()
                .map(|variable| (variable.clone(), BTreeMap::new()))
                .collect(),
            pooled,
        }
    }

    fn ingest(&mut self, fiscal_year: Option<i32>, cells: &[Cell]) {
        let bucket = if self.pooled { None } else { fiscal_year };
        for ((_, per_year), cell) in self.counts.iter_mut().zip(cells) {
            *per_year.entry(bucket).or_default().entry(*cell).or_insert(0) += 1;
        }
    }

    fn into_rows(self, top: usize) -> Vec<FrequencyRow> {
        let mut rows = Vec::new();
        for (variable, per_year) in self.counts {
            for (fiscal_year, counts) in per_year {
                let total = counts.values().sum::<usize>();
                let mut items = counts.into_iter().collect::<Vec<_>>();
                items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                if top > 0 {
                    items.truncate(top);
                }
                rows.extend(items.into_iter().map(|(value, count)| FrequencyRow {
                    label: describe(&variable, &value),
                    variable: variable.clone(),
                    fiscal_year,
                    value,
                    count,
                    percent: crate::assemble::percent(count, total),
                }));
            }
        }
        rows
    }
}

/// Counts values of `variables` in a unified artifact. `top` caps the
/// distinct values kept per variable and year (0 keeps all).
pub fn compute_frequencies(
    input: &Path,
    variables: &[String],
    top: usize,
    pooled: bool,
) -> Result<Vec<FrequencyRow>> {
    let mut reader = io_utils::open_csv_reader_from_path(input, io_utils::DEFAULT_CSV_DELIMITER)
        .with_context(|| format!("Opening {input:?}"))?;
    let headers = io_utils::reader_headers(&mut reader, UTF_8)?;
    let lookup = headers
        .iter()
        .enumerate()
        .map(|(idx, header)| (header.trim().to_ascii_uppercase(), idx))
        .collect::<HashMap<_, _>>();

    let variables = variables
        .iter()
        .map(|variable| variable.trim().to_ascii_uppercase())
        .collect::<Vec<_>>();
    let picks = variables
        .iter()
        .map(|variable| {
            lookup
                .get(variable)
                .copied()
                .ok_or_else(|| anyhow!("Column '{variable}' not found in {input:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let year_idx = lookup.get(FISCAL_YEAR_COLUMN).copied();
    if year_idx.is_none() && !pooled {
        return Err(anyhow!(
            "{input:?} has no {FISCAL_YEAR_COLUMN} column; use pooled counts instead"
        ));
    }

    let mut accumulator = FrequencyAccumulator::new(&variables, pooled);
    let mut record = csv::ByteRecord::new();
    let mut cells = Vec::with_capacity(picks.len());
    let mut line = 1usize;
    while reader
        .read_byte_record(&mut record)
        .with_context(|| format!("Reading row {}", line + 1))?
    {
        line += 1;
        let field = |idx: usize| {
            record
                .get(idx)
                .and_then(|raw| std::str::from_utf8(raw).ok())
                .and_then(parse_numeric_field)
        };
        let fiscal_year = match year_idx.and_then(field) {
            Some(Value::Integer(year)) => i32::try_from(year).ok(),
            _ => None,
        };
        cells.clear();
        cells.extend(picks.iter().map(|&idx| field(idx)));
        accumulator.ingest(fiscal_year, &cells);
    }
    Ok(accumulator.into_rows(top))
}

pub fn execute(args: &FrequencyArgs) -> Result<()> {
    let columns = if args.columns.is_empty() {
        CODEBOOKS
            .iter()
            .map(|book| book.variable.to_string())
            .collect::<Vec<_>>()
    } else {
        args.columns.clone()
    };
    let rows = compute_frequencies(&args.input, &columns, args.top, args.pooled)?;
    let mut table = TextTable::new(["column", "year", "value", "label", "count", "percent"])
        .align_right(&["value", "count", "percent"]);
    for row in &rows {
        table.push_row(row.to_strings());
    }
    table.print();
    info!(
        "Counted {} distinct value(s) across {} column(s) of {:?}",
        rows.len(),
        columns.len(),
        args.input
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codebook_lookup_is_case_insensitive() {
        let race = codebook("newrace").unwrap();
        assert_eq!(race.label(&Value::Integer(7)), Some("Multiracial"));
        assert_eq!(race.label(&Value::Integer(5)), None);
        assert!(codebook("AGE").is_none());
    }

    #[test]
    fn describe_flags_undocumented_codes() {
        assert_eq!(describe("MONSEX", &Some(Value::Integer(1))), "Female");
        assert_eq!(describe("MONSEX", &Some(Value::Integer(2))), "<not in code book>");
        assert_eq!(describe("MONSEX", &None), "<missing>");
        assert_eq!(describe("AGE", &Some(Value::Integer(35))), "");
    }

    #[test]
    fn accumulator_orders_by_count_then_value() {
        let variables = vec!["DSPLEA".to_string()];
        let mut accumulator = FrequencyAccumulator::new(&variables, false);
        for cell in [Some(8), Some(1), Some(1), None, Some(8), Some(1)] {
            accumulator.ingest(Some(2010), &[cell.map(Value::Integer)]);
        }
        accumulator.ingest(Some(2011), &[Some(Value::Integer(5))]);
        let rows = accumulator.into_rows(2);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].label, "Plea Agreement");
        assert_eq!(rows[0].count, 3);
        assert_eq!(rows[0].percent, 50.0);
        assert_eq!(rows[1].label, "Trial");
        assert_eq!(rows[2].fiscal_year, Some(2011));
        assert_eq!(rows[2].percent, 100.0);
    }

    #[test]
    fn pooled_counts_ignore_year() {
        let variables = vec!["MONSEX".to_string()];
        let mut accumulator = FrequencyAccumulator::new(&variables, true);
        accumulator.ingest(Some(2003), &[Some(Value::Integer(0))]);
        accumulator.ingest(Some(2004), &[Some(Value::Integer(0))]);
        let rows = accumulator.into_rows(0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fiscal_year, None);
        assert_eq!(rows[0].count, 2);
    }
}
