//! Sheet decoding and template generation.
//!
//! The engine only needs headers plus numbered rows of raw cells; anything
//! able to produce a [`ParsedSheet`] can implement [`SheetParser`]. The
//! bundled [`CsvSheetParser`] covers CSV/TSV exports:
//!
//! - **Encoding**: input decoded via `encoding_rs` with BOM sniffing,
//!   defaulting to UTF-8.
//! - **Numbering**: data rows are numbered from 1; the header row is not
//!   counted. Empty lines keep their place as all-empty rows, and a quoted
//!   cell spanning several lines still counts as one row.
//! - **Ragged rows**: short rows are padded with empty cells, extra cells
//!   beyond the header are dropped.

use std::io::Write;

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

use crate::{error::ImportError, profile::ImportProfile, value::CellValue};

pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_ROWS: usize = 10_000;
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub row_number: usize,
    /// Cells aligned with [`ParsedSheet::headers`].
    pub cells: Vec<CellValue>,
}

impl ParsedRow {
    pub fn new(row_number: usize, cells: Vec<CellValue>) -> Self {
        Self { row_number, cells }
    }

    pub fn cell(&self, index: usize) -> &CellValue {
        const EMPTY: &CellValue = &CellValue::Empty;
        self.cells.get(index).unwrap_or(EMPTY)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSheet {
    pub headers: Vec<String>,
    pub rows: Vec<ParsedRow>,
}

impl ParsedSheet {
    /// Builds a sheet from string cells, numbering rows from 1.
    pub fn from_text_rows<H, R, C>(headers: H, rows: R) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        let headers = headers.into_iter().map(Into::into).collect();
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(idx, cells)| {
                ParsedRow::new(
                    idx + 1,
                    cells
                        .into_iter()
                        .map(|cell| CellValue::from_text(cell.as_ref()))
                        .collect(),
                )
            })
            .collect();
        Self { headers, rows }
    }
}

pub trait SheetParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedSheet, ImportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetLimits {
    pub max_bytes: usize,
    pub max_rows: usize,
}

impl Default for SheetLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

impl SheetLimits {
    pub fn check_bytes(&self, bytes: &[u8]) -> Result<(), ImportError> {
        if bytes.is_empty() {
            return Err(ImportError::EmptyFile);
        }
        if bytes.len() > self.max_bytes {
            return Err(ImportError::FileTooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    pub fn check_rows(&self, sheet: &ParsedSheet) -> Result<(), ImportError> {
        if sheet.rows.len() > self.max_rows {
            return Err(ImportError::TooManyRows {
                rows: sheet.rows.len(),
                limit: self.max_rows,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CsvSheetParser {
    delimiter: u8,
    encoding: &'static Encoding,
}

impl Default for CsvSheetParser {
    fn default() -> Self {
        Self {
            delimiter: b',',
            encoding: UTF_8,
        }
    }
}

impl CsvSheetParser {
    pub fn new(delimiter: u8, encoding: &'static Encoding) -> Self {
        Self {
            delimiter,
            encoding,
        }
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }
}

impl SheetParser for CsvSheetParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedSheet, ImportError> {
        if bytes.is_empty() {
            return Err(ImportError::EmptyFile);
        }
        let (text, _, had_errors) = self.encoding.decode(bytes);
        if had_errors {
            return Err(ImportError::Sheet(format!(
                "input is not valid {}",
                self.encoding.name()
            )));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .double_quote(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|err| ImportError::Sheet(format!("reading header row: {err}")))?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();
        if headers.iter().all(String::is_empty) {
            return Err(ImportError::EmptyFile);
        }

        let mut rows = Vec::new();
        let mut record = csv::StringRecord::new();
        loop {
            let row_number = rows.len() + 1;
            let more = reader
                .read_record(&mut record)
                .map_err(|err| ImportError::Sheet(format!("reading row {row_number}: {err}")))?;
            if !more {
                break;
            }
            let offset = record
                .position()
                .map_or(0, |pos| usize::try_from(pos.byte()).unwrap_or(usize::MAX));
            for _ in 0..empty_lines_before(text.as_bytes(), offset) {
                let row_number = rows.len() + 1;
                rows.push(ParsedRow::new(row_number, vec![CellValue::Empty; headers.len()]));
            }
            let cells = (0..headers.len())
                .map(|col| CellValue::from_text(record.get(col).unwrap_or("")))
                .collect();
            rows.push(ParsedRow::new(rows.len() + 1, cells));
        }
        Ok(ParsedSheet { headers, rows })
    }
}

/// Empty lines the csv reader skipped before the record it positioned at `offset`.
///
/// The recorded position is where the previous record's terminator ended, so
/// the terminator run around it holds one line break of the previous record
/// plus one per empty line. Quoted line breaks never touch this run.
fn empty_lines_before(text: &[u8], offset: usize) -> usize {
    let is_terminator = |byte: &&u8| matches!(**byte, b'\n' | b'\r');
    let offset = offset.min(text.len());
    let before = text[..offset].iter().rev().take_while(is_terminator).count();
    let after = text[offset..].iter().take_while(is_terminator).count();
    text[offset - before..offset + after]
        .iter()
        .filter(|byte| **byte == b'\n')
        .count()
        .saturating_sub(1)
}

/// Writes a blank import template: a UTF-8 BOM followed by one header row.
pub fn write_template<W: Write>(profile: &ImportProfile, mut out: W, delimiter: u8) -> Result<()> {
    if profile.columns.is_empty() {
        return Err(anyhow!(
            "Profile '{}' has no columns to put in a template",
            profile.entity
        ));
    }
    out.write_all(UTF8_BOM).context("Writing template BOM")?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true)
        .from_writer(out);
    writer
        .write_record(profile.template_headers())
        .context("Writing template headers")?;
    writer.flush().context("Flushing template")?;
    Ok(())
}

pub fn generate_template(profile: &ImportProfile) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_template(profile, &mut buffer, b',')?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ColumnMapping;

    #[test]
    fn rows_are_numbered_from_one_and_padded() {
        let input = "Name,Phone,Year\nAcme,0900000001,1999\nBeta\n";
        let sheet = CsvSheetParser::default().parse(input.as_bytes()).unwrap();
        assert_eq!(sheet.headers, vec!["Name", "Phone", "Year"]);
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[0].row_number, 1);
        assert_eq!(sheet.rows[1].row_number, 2);
        assert_eq!(sheet.rows[1].cells.len(), 3);
        assert_eq!(sheet.rows[1].cell(1), &CellValue::Empty);
        assert_eq!(sheet.rows[0].cell(1), &CellValue::Text("0900000001".into()));
    }

    #[test]
    fn empty_lines_keep_their_row_numbers() {
        let input = "name,phone\nA,1\n\n,3\n\r\n\r\nD,4\n";
        let sheet = CsvSheetParser::default().parse(input.as_bytes()).unwrap();
        let numbers: Vec<usize> = sheet.rows.iter().map(|row| row.row_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(sheet.rows[1].cells, vec![CellValue::Empty, CellValue::Empty]);
        assert_eq!(sheet.rows[2].cell(1), &CellValue::Text("3".into()));
        assert_eq!(sheet.rows[5].cell(0), &CellValue::Text("D".into()));
    }

    #[test]
    fn quoted_line_breaks_stay_in_one_row() {
        let input = "name,note\r\n\"Acme\",\"first\r\n\r\nthird\"\r\nBeta,x\r\n";
        let sheet = CsvSheetParser::default().parse(input.as_bytes()).unwrap();
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[1].row_number, 2);
        assert_eq!(sheet.rows[1].cell(0), &CellValue::Text("Beta".into()));
    }

    #[test]
    fn bom_is_stripped_from_first_header() {
        let mut input = UTF8_BOM.to_vec();
        input.extend_from_slice("Tên,SĐT\nAn,1\n".as_bytes());
        let sheet = CsvSheetParser::default().parse(&input).unwrap();
        assert_eq!(sheet.headers[0], "Tên");
    }

    #[test]
    fn legacy_encodings_are_decoded_when_requested() {
        let encoding = Encoding::for_label(b"windows-1252").unwrap();
        let (bytes, _, _) = encoding.encode("Café,Prix\nCrème,3\n");
        let sheet = CsvSheetParser::new(b',', encoding).parse(&bytes).unwrap();
        assert_eq!(sheet.headers[0], "Café");
        assert_eq!(sheet.rows[0].cell(0), &CellValue::Text("Crème".into()));
    }

    #[test]
    fn empty_input_is_fatal() {
        assert!(matches!(
            CsvSheetParser::default().parse(b""),
            Err(ImportError::EmptyFile)
        ));
        assert!(matches!(
            CsvSheetParser::default().parse(b"\n"),
            Err(ImportError::EmptyFile)
        ));
    }

    #[test]
    fn limits_reject_oversized_input() {
        let limits = SheetLimits {
            max_bytes: 4,
            max_rows: 1,
        };
        assert!(matches!(
            limits.check_bytes(b"12345"),
            Err(ImportError::FileTooLarge { size: 5, limit: 4 })
        ));
        let sheet = ParsedSheet::from_text_rows(["a"], [["1"], ["2"]]);
        assert!(matches!(
            limits.check_rows(&sheet),
            Err(ImportError::TooManyRows { rows: 2, limit: 1 })
        ));
    }

    #[test]
    fn template_holds_first_header_of_each_column() {
        let profile = ImportProfile::new(
            "customers",
            vec![
                ColumnMapping::text("name").with_headers(["Tên khách buôn", "Name"]),
                ColumnMapping::text("phone"),
            ],
        );
        let bytes = generate_template(&profile).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        assert_eq!(text.trim_end(), "\"Tên khách buôn\",\"phone\"");
    }
}
