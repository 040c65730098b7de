#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

/// Column positions (1-indexed, inclusive) used by the synthetic vintages.
pub const FULL_LAYOUT: &[(&str, usize, usize)] = &[
    ("DISTRICT", 1, 2),
    ("OFFGUIDE", 3, 4),
    ("SENTTOT", 5, 10),
    ("SENTIMP", 11, 11),
    ("XMINSOR", 12, 17),
    ("XMAXSOR", 18, 23),
    ("NEWRACE", 24, 24),
    ("MONSEX", 25, 25),
    ("AGE", 26, 27),
    ("CITIZEN", 28, 28),
    ("NEWEDUC", 29, 29),
    ("CRIMHIST", 30, 30),
    ("CRIMPTS", 31, 32),
    ("WEAPON", 33, 33),
    ("DSPLEA", 34, 34),
    ("INOUT", 35, 35),
    ("PRESENT", 36, 36),
];

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` under the workspace, creating parent directories.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    /// Builds a stored (uncompressed) zip holding `entries`.
    pub fn write_zip(&self, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        let file = File::create(&path).expect("create zip");
        let mut writer = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (entry, contents) in entries {
            writer.start_file(*entry, options).expect("start zip entry");
            writer.write_all(contents).expect("write zip entry");
        }
        writer.finish().expect("finish zip");
        path
    }
}

/// A SAS data step whose `INPUT` statement declares `fields` as ranges.
pub fn declaration(fields: &[(&str, usize, usize)]) -> String {
    let mut text = String::from("DATA opafy;\n  INFILE 'opafy.dat' LRECL=400;\n  INPUT\n");
    for (name, first, last) in fields {
        text.push_str(&format!("    {name} {first}-{last}\n"));
    }
    text.push_str("  ;\nRUN;\n");
    text
}

/// The full layout with `drop` removed and `rename` applied.
pub fn layout_variant(drop: &[&str], rename: &[(&str, &str)]) -> Vec<(&'static str, usize, usize)> {
    FULL_LAYOUT
        .iter()
        .filter(|(name, _, _)| !drop.contains(name))
        .map(|&(name, first, last)| {
            let name = rename
                .iter()
                .find(|(from, _)| *from == name)
                .map(|(_, to)| leak(to))
                .unwrap_or(name);
            (name, first, last)
        })
        .collect()
}

fn leak(value: &str) -> &'static str {
    Box::leak(value.to_string().into_boxed_str())
}

/// One fixed-width record: each value right-aligned inside its columns.
pub fn record(layout: &[(&str, usize, usize)], values: &[(&str, &str)]) -> String {
    let width = layout.iter().map(|(_, _, last)| *last).max().unwrap_or(0);
    let mut line = vec![b' '; width];
    for (name, value) in values {
        let Some((_, first, last)) = layout.iter().find(|(field, _, _)| field == name) else {
            continue;
        };
        let span = last - first + 1;
        assert!(value.len() <= span, "{name}={value} does not fit in {span} bytes");
        let start = first - 1 + (span - value.len());
        line[start..start + value.len()].copy_from_slice(value.as_bytes());
    }
    String::from_utf8(line).expect("ascii record")
}

/// A record with every variable of `layout` populated from a row number.
pub fn sample_record(layout: &[(&str, usize, usize)], row: usize) -> String {
    let district = format!("{}", row % 90 + 1);
    let offense = format!("{}", row % 30 + 1);
    let months = format!("{}", 12 + row);
    let values = [
        ("DISTRICT", district.as_str()),
        ("OFFGUIDE", offense.as_str()),
        ("OFFTYPE2", offense.as_str()),
        ("SENTTOT", months.as_str()),
        ("SENTIMP", "1"),
        ("XMINSOR", "10"),
        ("XMAXSOR", "16"),
        ("NEWRACE", "2"),
        ("MONRACE", "2"),
        ("MONSEX", "0"),
        ("AGE", "35"),
        ("CITIZEN", "1"),
        ("NEWEDUC", "3"),
        ("CRIMHIST", "2"),
        ("CRIMPTS", "3"),
        ("WEAPON", "0"),
        ("DSPLEA", "1"),
        ("INOUT", "1"),
        ("PRESENT", "1"),
    ];
    record(layout, &values)
}

/// Data file body with `rows` synthetic records.
pub fn sample_data(layout: &[(&str, usize, usize)], rows: usize) -> String {
    (0..rows)
        .map(|row| sample_record(layout, row) + "\n")
        .collect()
}

/// Writes a loose `sas_fy{yy}` extract for `fiscal_year`.
pub fn write_extract(
    workspace: &TestWorkspace,
    fiscal_year: i32,
    layout: &[(&str, usize, usize)],
    rows: usize,
) -> PathBuf {
    let yy = fiscal_year % 100;
    let dir = format!("sas_fy{yy:02}");
    workspace.write(
        &format!("{dir}/opafy{yy:02}nid.sas"),
        &declaration(layout),
    );
    workspace.write(&format!("{dir}/opafy{yy:02}nid.dat"), &sample_data(layout, rows));
    workspace.path().join(dir)
}

/// Reads a CSV into a header and rows of raw strings.
pub fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).expect("open csv");
    let headers = reader
        .headers()
        .expect("headers")
        .iter()
        .map(str::to_string)
        .collect();
    let rows = reader
        .records()
        .map(|record| {
            record
                .expect("record")
                .iter()
                .map(str::to_string)
                .collect()
        })
        .collect();
    (headers, rows)
}

pub fn column<'a>(headers: &[String], rows: &'a [Vec<String>], name: &str) -> Vec<&'a str> {
    let idx = headers
        .iter()
        .position(|header| header == name)
        .unwrap_or_else(|| panic!("column {name} missing"));
    rows.iter().map(|row| row[idx].as_str()).collect()
}
