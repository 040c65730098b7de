//! I/O utilities for encoding resolution, CSV reading and writing.
//!
//! All file I/O in sentencing-ingest flows through this module. It provides:
//!
//! - **Encoding**: legacy inputs decode through `encoding_rs`, defaulting to
//!   windows-1252 (the WHATWG reading of "latin1") so stray high bytes never
//!   abort a read.
//! - **Delimiter resolution**: extension-based detection (`.tsv` → tab,
//!   everything else → comma) with manual override support.
//! - **Reader/writer construction**: `open_csv_reader_from_path` and
//!   `open_csv_writer`, with the `-` path convention routing through stdin.
//! - **Digests**: [`DigestWriter`] hashes everything written through it.

use std::{
    fs::File,
    io::{self, BufReader, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, WINDOWS_1252};
use sha2::{Digest, Sha256};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(WINDOWS_1252)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(path: &Path, delimiter: u8) -> io::Result<csv::Reader<Box<dyn Read>>> {
    let reader: Box<dyn Read> = if is_dash(path) {
        Box::new(io::stdin().lock())
    } else {
        Box::new(BufReader::new(File::open(path)?))
    };
    Ok(open_csv_reader(reader, delimiter))
}

/// CSV writer for the unified artifact: comma separated, minimal quoting,
/// `\n` terminators so output bytes do not depend on the host platform.
pub fn open_csv_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(DEFAULT_CSV_DELIMITER)
        .quote_style(QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer)
}

/// Decodes legacy bytes, substituting anything the encoding cannot map.
pub fn decode_lossy<'a>(bytes: &'a [u8], encoding: &'static Encoding) -> std::borrow::Cow<'a, str> {
    encoding.decode_without_bom_handling(bytes).0
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Vec<String> {
    record
        .iter()
        .map(|field| decode_lossy(field, encoding).into_owned())
        .collect()
}

pub fn reader_headers<R>(reader: &mut csv::Reader<R>, encoding: &'static Encoding) -> Result<Vec<String>>
where
    R: Read,
{
    let headers = reader.byte_headers().context("Reading header row")?.clone();
    Ok(decode_record(&headers, encoding))
}

/// Pass-through writer that keeps a SHA-256 of every byte written.
pub struct DigestWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Returns the inner writer, the lowercase hex digest and the byte count.
    pub fn finish(self) -> (W, String, u64) {
        let digest = format!("{:x}", self.hasher.finalize());
        (self.inner, digest, self.written)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.hasher.update(&buf[..count]);
        self.written += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
