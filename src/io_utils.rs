//! File and stream helpers for the command line.
//!
//! - `-` stands for stdin on input and missing paths for stdout on output.
//! - Delimiters default from the file extension (`.tsv` is tab separated).
//! - Encodings are resolved from WHATWG labels through `encoding_rs`.

use std::{
    fs::File,
    io::{self, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};

use crate::{error::ImportError, sheet::SheetLimits};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'")),
        None => Ok(UTF_8),
    }
}

pub fn resolve_delimiter(path: Option<&Path>, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| {
        match path.and_then(|p| p.extension()).and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
            _ => DEFAULT_CSV_DELIMITER,
        }
    })
}

/// Reads the input, `-` meaning stdin, refusing files larger than `limits`.
///
/// At most one byte past the limit is read so that
/// [`SheetLimits::check_bytes`] still sees an oversized stream.
pub fn read_input(path: &Path, limits: &SheetLimits) -> Result<Vec<u8>> {
    if is_dash(path) {
        return read_limited(io::stdin().lock(), limits.max_bytes)
            .context("Reading input from stdin");
    }
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    let size = file
        .metadata()
        .with_context(|| format!("Inspecting input file {path:?}"))?
        .len();
    let size = usize::try_from(size).unwrap_or(usize::MAX);
    if size > limits.max_bytes {
        return Err(ImportError::FileTooLarge {
            size,
            limit: limits.max_bytes,
        })
        .with_context(|| format!("Reading input file {path:?}"));
    }
    read_limited(file, limits.max_bytes).with_context(|| format!("Reading input file {path:?}"))
}

fn read_limited<R: Read>(reader: R, max_bytes: usize) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let cap = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    reader.take(cap).read_to_end(&mut bytes)?;
    Ok(bytes)
}

pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) if !is_dash(path) => {
            let file =
                File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        _ => Ok(Box::new(BufWriter::new(io::stdout().lock()))),
    }
}

pub fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
