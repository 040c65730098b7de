use std::fmt;

use serde::{Deserialize, Serialize};

/// A typed cell in a case record. Every ingested variable is numeric; text
/// that does not parse becomes a missing cell instead of a value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Integer(i) => *i as f64,
            Value::Float(f) => *f,
        }
    }
}

impl Eq for Value {}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (left, right) => left.as_f64().total_cmp(&right.as_f64()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// One optional cell; `None` is the explicit missing marker.
pub type Cell = Option<Value>;

/// True when a raw field is the "not applicable" sentinel: optional spaces
/// followed by a single period.
pub fn is_missing_sentinel(raw: &str) -> bool {
    raw.trim() == "."
}

/// Coerces a raw field into a numeric cell.
///
/// Blank text, the period sentinel, and anything that is not a number all
/// yield `None`. Out-of-range codes such as `9999` or `470` pass through
/// untouched.
pub fn parse_numeric_field(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_missing_sentinel(trimmed) {
        return None;
    }
    if let Ok(parsed) = trimmed.parse::<i64>() {
        return Some(Value::Integer(parsed));
    }
    match trimmed.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Some(Value::Float(parsed)),
        _ => None,
    }
}

/// Renders a cell for CSV output; missing cells become the empty field.
pub fn render_cell(cell: &Cell) -> String {
    cell.as_ref().map(Value::as_display).unwrap_or_default()
}

/// Rows for one fiscal year. Every row carries the same fiscal-year tag, so
/// the tag lives on the table and is written out per row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YearTable {
    pub fiscal_year: i32,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl YearTable {
    pub fn new(fiscal_year: i32, columns: Vec<String>) -> Self {
        Self {
            fiscal_year,
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn non_null_count(&self, name: &str) -> usize {
        match self.column_index(name) {
            Some(idx) => self
                .rows
                .iter()
                .filter(|row| row.get(idx).is_some_and(Option::is_some))
                .count(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_accepts_padded_periods() {
        assert!(is_missing_sentinel("."));
        assert!(is_missing_sentinel(" ."));
        assert!(is_missing_sentinel("   ."));
        assert!(is_missing_sentinel(" . "));
        assert!(!is_missing_sentinel(".5"));
        assert!(!is_missing_sentinel(".."));
    }

    #[test]
    fn parse_numeric_field_never_turns_sentinel_into_zero() {
        assert_eq!(parse_numeric_field("  ."), None);
        assert_eq!(parse_numeric_field(" 0"), Some(Value::Integer(0)));
    }

    #[test]
    fn parse_numeric_field_keeps_out_of_range_codes() {
        assert_eq!(parse_numeric_field("9996"), Some(Value::Integer(9996)));
        assert_eq!(parse_numeric_field("470"), Some(Value::Integer(470)));
    }

    #[test]
    fn parse_numeric_field_coerces_garbage_to_missing() {
        assert_eq!(parse_numeric_field("A"), None);
        assert_eq!(parse_numeric_field("1 2"), None);
        assert_eq!(parse_numeric_field("NaN"), None);
        assert_eq!(parse_numeric_field(""), None);
    }

    #[test]
    fn parse_numeric_field_falls_back_to_float() {
        assert_eq!(parse_numeric_field("12.5"), Some(Value::Float(12.5)));
        assert_eq!(parse_numeric_field("-3"), Some(Value::Integer(-3)));
    }

    #[test]
    fn render_cell_prints_whole_floats_without_fraction() {
        assert_eq!(render_cell(&Some(Value::Float(35.0))), "35");
        assert_eq!(render_cell(&Some(Value::Float(2.25))), "2.25");
        assert_eq!(render_cell(&None), "");
    }

    #[test]
    fn year_table_reports_absent_columns_as_null() {
        let mut table = YearTable::new(2010, vec!["AGE".to_string()]);
        table.rows.push(vec![Some(Value::Integer(40))]);
        table.rows.push(vec![None]);
        assert_eq!(table.non_null_count("AGE"), 1);
        assert_eq!(table.non_null_count("DSPLEA"), 0);
        assert_eq!(table.column_index("DSPLEA"), None);
    }

    #[test]
    fn mixed_values_order_numerically() {
        assert!(Value::Integer(2) < Value::Float(2.5));
        assert!(Value::Float(10.0) > Value::Integer(3));
    }
}
