//! Where a fiscal year's data comes from, and how to turn it into a raw table.
//!
//! Fixed-width years need a declaration plus a data file, delivered loose,
//! inside a zip archive, or in an already-extracted directory. Years with a
//! prepared export arrive as one delimited file and skip the layout parser.

use std::{
    fs::{self, File},
    io::{BufReader, Read},
    ops::RangeInclusive,
    path::{Path, PathBuf},
};

use encoding_rs::Encoding;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use crate::{
    data::YearTable,
    dialect::Dialect,
    error::{IngestError, IngestResult},
    extract::{self, ExtractSummary},
    io_utils,
    layout::ColumnLayout,
    reconcile,
};

const LAYOUT_EXTENSION: &str = "sas";
const DATA_EXTENSION: &str = "dat";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SourceSpec {
    FixedWidth { layout: PathBuf, data: PathBuf },
    Archive { path: PathBuf },
    Directory { path: PathBuf },
    Delimited {
        path: PathBuf,
        #[serde(default)]
        delimiter: Option<char>,
    },
}

impl SourceSpec {
    pub fn describe(&self) -> String {
        match self {
            SourceSpec::FixedWidth { data, .. } => format!("fixed-width {}", data.display()),
            SourceSpec::Archive { path } => format!("archive {}", path.display()),
            SourceSpec::Directory { path } => format!("directory {}", path.display()),
            SourceSpec::Delimited { path, .. } => format!("delimited {}", path.display()),
        }
    }

    /// Resolves relative paths against `base` (a plan file's directory).
    pub fn rebase(&mut self, base: &Path) {
        let rebase = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        match self {
            SourceSpec::FixedWidth { layout, data } => {
                rebase(layout);
                rebase(data);
            }
            SourceSpec::Archive { path }
            | SourceSpec::Directory { path }
            | SourceSpec::Delimited { path, .. } => rebase(path),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct YearSource {
    pub fiscal_year: i32,
    /// `None` records a year that was expected but has nothing to read.
    #[serde(default)]
    pub source: Option<SourceSpec>,
}

/// A year's raw table plus what was learned while reading it.
#[derive(Debug, Clone)]
pub struct LoadedYear {
    pub table: YearTable,
    pub layout_fields: Option<usize>,
    pub extract: Option<ExtractSummary>,
}

impl YearSource {
    pub fn new(fiscal_year: i32, source: SourceSpec) -> Self {
        Self {
            fiscal_year,
            source: Some(source),
        }
    }

    pub fn load(&self, dialect: &Dialect, encoding: &'static Encoding) -> IngestResult<LoadedYear> {
        let fiscal_year = self.fiscal_year;
        let Some(source) = &self.source else {
            return Err(IngestError::MissingArtifact {
                fiscal_year,
                what: "any source file".to_string(),
            });
        };
        match source {
            SourceSpec::FixedWidth { layout, data } => {
                require(layout, fiscal_year, "declaration file")?;
                require(data, fiscal_year, "data file")?;
                let parsed = ColumnLayout::from_path(layout, encoding, dialect.width_policy)?;
                let fields = usable_fields(&parsed, dialect, fiscal_year)?;
                let (table, summary) = extract::extract_file(data, &fields, fiscal_year, encoding)?;
                Ok(LoadedYear {
                    table,
                    layout_fields: Some(parsed.len()),
                    extract: Some(summary),
                })
            }
            SourceSpec::Archive { path } => {
                require(path, fiscal_year, "archive")?;
                load_archive(path, fiscal_year, dialect, encoding)
            }
            SourceSpec::Directory { path } => {
                require(path, fiscal_year, "extract directory")?;
                let (layout, data) = find_pair(path, fiscal_year)?;
                YearSource::new(fiscal_year, SourceSpec::FixedWidth { layout, data })
                    .load(dialect, encoding)
            }
            SourceSpec::Delimited { path, delimiter } => {
                require(path, fiscal_year, "delimited export")?;
                let delimiter = io_utils::resolve_input_delimiter(
                    path,
                    delimiter.and_then(|c| u8::try_from(c).ok()),
                );
                let table = reconcile::read_delimited(path, delimiter, fiscal_year, dialect, encoding)?;
                Ok(LoadedYear {
                    table,
                    layout_fields: None,
                    extract: None,
                })
            }
        }
    }
}

fn require(path: &Path, fiscal_year: i32, what: &str) -> IngestResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(IngestError::MissingArtifact {
            fiscal_year,
            what: format!("{what} {}", path.display()),
        })
    }
}

/// Checks the usable threshold and returns the ranges of every name the
/// dialect can use, canonical or alias.
fn usable_fields(
    layout: &ColumnLayout,
    dialect: &Dialect,
    fiscal_year: i32,
) -> IngestResult<Vec<(String, crate::layout::ByteRange)>> {
    layout.ensure_usable(dialect)?;
    let wanted = dialect.source_names();
    for name in layout.unresolved() {
        if wanted.contains(name) {
            warn!("FY{fiscal_year}: '{name}' is declared at a single column with no width; treated as absent");
        }
    }
    Ok(layout.select(&wanted))
}

fn has_extension(name: &str, extension: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// macOS archivers add `__MACOSX/` trees and `._name` AppleDouble files.
fn is_resource_fork(entry: &str) -> bool {
    entry.split('/').any(|part| part == "__MACOSX")
        || entry.rsplit('/').next().is_some_and(|base| base.starts_with("._"))
}

fn load_archive(
    path: &Path,
    fiscal_year: i32,
    dialect: &Dialect,
    encoding: &'static Encoding,
) -> IngestResult<LoadedYear> {
    let file = File::open(path).map_err(|err| IngestError::io(path, err))?;
    let mut archive =
        ZipArchive::new(BufReader::new(file)).map_err(|err| IngestError::archive(path, err.to_string()))?;

    let mut names = archive
        .file_names()
        .filter(|name| !name.ends_with('/') && !is_resource_fork(name))
        .map(str::to_string)
        .collect::<Vec<_>>();
    names.sort();
    let layout_name = names
        .iter()
        .find(|name| has_extension(name, LAYOUT_EXTENSION))
        .cloned()
        .ok_or_else(|| IngestError::archive(path, "no .sas declaration inside"))?;
    let data_name = names
        .iter()
        .find(|name| has_extension(name, DATA_EXTENSION))
        .cloned()
        .ok_or_else(|| IngestError::archive(path, "no .dat data file inside"))?;
    debug!("FY{fiscal_year}: using {layout_name} and {data_name} from {path:?}");

    let mut layout_bytes = Vec::new();
    archive
        .by_name(&layout_name)
        .map_err(|err| IngestError::archive(path, err.to_string()))?
        .read_to_end(&mut layout_bytes)
        .map_err(|err| IngestError::archive(path, err.to_string()))?;
    let layout_text = io_utils::decode_lossy(&layout_bytes, encoding);
    let parsed = ColumnLayout::parse_named(
        &layout_text,
        &format!("{}!{layout_name}", path.display()),
        dialect.width_policy,
    )?;
    let fields = usable_fields(&parsed, dialect, fiscal_year)?;

    let entry = archive
        .by_name(&data_name)
        .map_err(|err| IngestError::archive(path, err.to_string()))?;
    let origin = path.join(&data_name);
    let (table, summary) =
        extract::extract_records(BufReader::new(entry), &origin, &fields, fiscal_year, encoding)?;
    Ok(LoadedYear {
        table,
        layout_fields: Some(parsed.len()),
        extract: Some(summary),
    })
}

fn sorted_entries(dir: &Path) -> IngestResult<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .map_err(|err| IngestError::io(dir, err))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

fn first_with_extension(entries: &[PathBuf], extension: &str) -> Option<PathBuf> {
    entries
        .iter()
        .find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| has_extension(name, extension))
        })
        .cloned()
}

fn find_pair(dir: &Path, fiscal_year: i32) -> IngestResult<(PathBuf, PathBuf)> {
    let entries = sorted_entries(dir)?;
    let layout = first_with_extension(&entries, LAYOUT_EXTENSION).ok_or_else(|| {
        IngestError::MissingArtifact {
            fiscal_year,
            what: format!("declaration file in {}", dir.display()),
        }
    })?;
    let data = first_with_extension(&entries, DATA_EXTENSION).ok_or_else(|| {
        IngestError::MissingArtifact {
            fiscal_year,
            what: format!("data file in {}", dir.display()),
        }
    })?;
    Ok((layout, data))
}

/// File stems the publisher has used for a year, oldest convention first.
fn publication_stems(fiscal_year: i32) -> [String; 2] {
    let yy = fiscal_year.rem_euclid(100);
    [format!("opafy{yy:02}nid"), format!("opafy{yy:02}-nid")]
}

/// Resolves one year inside `data_dir` by naming convention: an extracted
/// `sas_fy{yy}` directory, then a zip archive, then a delimited export.
pub fn discover_year(data_dir: &Path, fiscal_year: i32) -> YearSource {
    let yy = fiscal_year.rem_euclid(100);
    let stems = publication_stems(fiscal_year);

    let extract_dir = data_dir.join(format!("sas_fy{yy:02}"));
    if extract_dir.is_dir() {
        for stem in &stems {
            let layout = extract_dir.join(format!("{stem}.{LAYOUT_EXTENSION}"));
            let data = extract_dir.join(format!("{stem}.{DATA_EXTENSION}"));
            if layout.is_file() && data.is_file() {
                return YearSource::new(fiscal_year, SourceSpec::FixedWidth { layout, data });
            }
        }
        if find_pair(&extract_dir, fiscal_year).is_ok() {
            return YearSource::new(fiscal_year, SourceSpec::Directory { path: extract_dir });
        }
    }

    for stem in &stems {
        let archive = data_dir.join(format!("{stem}.zip"));
        if archive.is_file() {
            return YearSource::new(fiscal_year, SourceSpec::Archive { path: archive });
        }
    }

    let export_dir = data_dir.join(format!("individual_fy{yy:02}"));
    let candidates = [
        export_dir.join("slim.csv"),
        export_dir.join(format!("{}.csv", stems[0])),
    ];
    for path in candidates {
        if path.is_file() {
            return YearSource::new(
                fiscal_year,
                SourceSpec::Delimited {
                    path,
                    delimiter: None,
                },
            );
        }
    }

    debug!("FY{fiscal_year}: nothing found under {data_dir:?}");
    YearSource {
        fiscal_year,
        source: None,
    }
}

pub fn discover(data_dir: &Path, years: RangeInclusive<i32>) -> Vec<YearSource> {
    years.map(|year| discover_year(data_dir, year)).collect()
}
