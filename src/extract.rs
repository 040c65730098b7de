//! Fixed-width record extraction.
//!
//! Each input line is one case record. Fields are sliced on raw bytes, so a
//! stray non-UTF-8 byte elsewhere in a line cannot shift any offsets; only
//! the slice itself is decoded. A line shorter than a field's start yields a
//! missing cell, and a field running past the end of the line is clipped.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use encoding_rs::Encoding;
use log::debug;

use crate::{
    data::{Cell, YearTable, parse_numeric_field},
    error::{IngestError, IngestResult},
    io_utils,
    layout::ByteRange,
};

/// Counters gathered while extracting one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub bytes_read: u64,
    pub records: usize,
    pub blank_lines: usize,
    /// Records too short to reach the furthest declared field.
    pub short_records: usize,
    pub longest_record: usize,
}

/// Slices one raw line into typed cells, one per field.
pub fn slice_record(line: &[u8], fields: &[(String, ByteRange)], encoding: &'static Encoding) -> Vec<Cell> {
    fields
        .iter()
        .map(|(_, range)| {
            if range.start >= line.len() {
                return None;
            }
            let end = range.end.min(line.len());
            let raw = io_utils::decode_lossy(&line[range.start..end], encoding);
            parse_numeric_field(&raw)
        })
        .collect()
}

fn trim_line_ending(mut line: &[u8]) -> &[u8] {
    if let Some(rest) = line.strip_suffix(b"\n") {
        line = rest;
    }
    if let Some(rest) = line.strip_suffix(b"\r") {
        line = rest;
    }
    line
}

/// Reads every record from `reader`. An input without a single non-blank
/// record is [`IngestError::EmptyData`]; read failures are [`IngestError::Io`].
pub fn extract_records<R: BufRead>(
    mut reader: R,
    origin: &Path,
    fields: &[(String, ByteRange)],
    fiscal_year: i32,
    encoding: &'static Encoding,
) -> IngestResult<(YearTable, ExtractSummary)> {
    let columns = fields.iter().map(|(name, _)| name.clone()).collect();
    let mut table = YearTable::new(fiscal_year, columns);
    let mut summary = ExtractSummary::default();
    let furthest = fields.iter().map(|(_, range)| range.end).max().unwrap_or(0);
    let mut buffer = Vec::with_capacity(4096);

    loop {
        buffer.clear();
        let read = reader
            .read_until(b'\n', &mut buffer)
            .map_err(|err| IngestError::io(origin, err))?;
        if read == 0 {
            break;
        }
        summary.bytes_read += read as u64;
        let line = trim_line_ending(&buffer);
        if line.iter().all(u8::is_ascii_whitespace) {
            summary.blank_lines += 1;
            continue;
        }
        summary.longest_record = summary.longest_record.max(line.len());
        if line.len() < furthest {
            summary.short_records += 1;
        }
        table.rows.push(slice_record(line, fields, encoding));
        summary.records += 1;
    }

    if summary.records == 0 {
        return Err(IngestError::EmptyData {
            path: origin.to_path_buf(),
        });
    }
    if furthest > summary.longest_record {
        debug!(
            "{:?}: layout reaches byte {} but the longest record is {} bytes",
            origin, furthest, summary.longest_record
        );
    }
    Ok((table, summary))
}

pub fn extract_file(
    path: &Path,
    fields: &[(String, ByteRange)],
    fiscal_year: i32,
    encoding: &'static Encoding,
) -> IngestResult<(YearTable, ExtractSummary)> {
    let file = File::open(path).map_err(|err| IngestError::io(path, err))?;
    extract_records(BufReader::new(file), path, fields, fiscal_year, encoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use encoding_rs::WINDOWS_1252;

    fn field(name: &str, start: usize, end: usize) -> (String, ByteRange) {
        (name.to_string(), ByteRange { start, end })
    }

    #[test]
    fn slice_record_clips_and_misses_short_lines() {
        let fields = vec![field("A", 0, 2), field("B", 3, 10), field("C", 20, 22)];
        let cells = slice_record(b"12 345", &fields, WINDOWS_1252);
        assert_eq!(
            cells,
            vec![Some(Value::Integer(12)), Some(Value::Integer(345)), None]
        );
    }

    #[test]
    fn slice_record_tolerates_high_bytes_outside_fields() {
        let fields = vec![field("A", 3, 5)];
        let cells = slice_record(b"\xe9\xff 42", &fields, WINDOWS_1252);
        assert_eq!(cells, vec![Some(Value::Integer(42))]);
    }

    #[test]
    fn trim_line_ending_handles_crlf() {
        assert_eq!(trim_line_ending(b"abc\r\n"), b"abc");
        assert_eq!(trim_line_ending(b"abc\n"), b"abc");
        assert_eq!(trim_line_ending(b"abc"), b"abc");
    }

    #[test]
    fn extract_records_skips_blank_lines_and_counts_short_ones() {
        let data: &[u8] = b"0123\n\n  \r\n01\n";
        let fields = vec![field("A", 0, 2), field("B", 2, 4)];
        let (table, summary) =
            extract_records(data, Path::new("mem"), &fields, 2005, WINDOWS_1252).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.fiscal_year, 2005);
        assert_eq!(summary.blank_lines, 2);
        assert_eq!(summary.short_records, 1);
        assert_eq!(summary.longest_record, 4);
        assert_eq!(table.rows[1], vec![Some(Value::Integer(1)), None]);
    }

    #[test]
    fn extract_records_rejects_empty_input() {
        let data: &[u8] = b"";
        let err = extract_records(data, Path::new("mem"), &[], 2005, WINDOWS_1252).unwrap_err();
        assert!(matches!(err, IngestError::EmptyData { .. }));
    }
}
