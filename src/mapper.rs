//! Header to canonical field mapping.
//!
//! Headers are normalized (trimmed, case-folded, runs of whitespace and
//! underscores collapsed to one space) and compared with every accepted name
//! of every column. Exact matches are resolved first for all headers; headers
//! left over are then matched fuzzily against the columns nobody claimed yet;
//! a fuzzy candidate must carry exactly the same numbers as the header, so
//! `Phone 2` never lands in `Phone 1`. When names overlap between columns the first declared column wins.

use std::collections::BTreeMap;

use itertools::Itertools;
use log::{debug, warn};
use similar::TextDiff;

use crate::{profile::ColumnMapping, sheet::ParsedRow, value::CellValue};

pub const DEFAULT_FUZZY_THRESHOLD: f32 = 0.85;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderTarget {
    Field(String),
    Unmapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq)]
struct HeaderEntry {
    header: String,
    target: HeaderTarget,
    kind: Option<MatchKind>,
}

/// Result of mapping one header row, in header order.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderMap {
    entries: Vec<HeaderEntry>,
}

impl HeaderMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn target(&self, header: &str) -> &HeaderTarget {
        static UNMAPPED: HeaderTarget = HeaderTarget::Unmapped;
        self.entries
            .iter()
            .find(|entry| entry.header == header)
            .map(|entry| &entry.target)
            .unwrap_or(&UNMAPPED)
    }

    pub fn field_for(&self, header: &str) -> Option<&str> {
        match self.target(header) {
            HeaderTarget::Field(field) => Some(field),
            HeaderTarget::Unmapped => None,
        }
    }

    pub fn match_kind(&self, header: &str) -> Option<MatchKind> {
        self.entries
            .iter()
            .find(|entry| entry.header == header)
            .and_then(|entry| entry.kind)
    }

    /// `(header, field)` pairs for every mapped header.
    pub fn mapped(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|entry| match &entry.target {
            HeaderTarget::Field(field) => Some((entry.header.as_str(), field.as_str())),
            HeaderTarget::Unmapped => None,
        })
    }

    pub fn unmapped_headers(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|entry| entry.target == HeaderTarget::Unmapped)
            .map(|entry| entry.header.as_str())
            .collect()
    }

    /// Columns that no header in the sheet feeds.
    pub fn missing_fields<'a>(&self, columns: &'a [ColumnMapping]) -> Vec<&'a ColumnMapping> {
        columns
            .iter()
            .filter(|column| !self.mapped().any(|(_, field)| field == column.field))
            .collect()
    }

    pub fn apply(&self, row: &ParsedRow) -> MappedRow {
        let fields = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| match &entry.target {
                HeaderTarget::Field(field) => Some((field.clone(), row.cell(idx).clone())),
                HeaderTarget::Unmapped => None,
            })
            .collect();
        MappedRow {
            row_number: row.row_number,
            fields,
        }
    }
}

/// A parsed row keyed by canonical field instead of header text.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRow {
    pub row_number: usize,
    pub fields: BTreeMap<String, CellValue>,
}

impl MappedRow {
    pub fn new<I, K>(row_number: usize, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, CellValue)>,
        K: Into<String>,
    {
        Self {
            row_number,
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn value(&self, field: &str) -> Option<&CellValue> {
        self.fields.get(field).filter(|value| !value.is_blank())
    }

    pub fn text(&self, field: &str) -> Option<String> {
        self.fields.get(field).and_then(CellValue::as_text)
    }

    pub fn is_blank(&self) -> bool {
        self.fields.values().all(CellValue::is_blank)
    }
}

pub fn normalize_header(header: &str) -> String {
    header
        .replace('_', " ")
        .split_whitespace()
        .join(" ")
        .to_lowercase()
}

pub struct FieldMapper<'a> {
    columns: &'a [ColumnMapping],
    fuzzy_threshold: f32,
}

impl<'a> FieldMapper<'a> {
    pub fn new(columns: &'a [ColumnMapping]) -> Self {
        Self {
            columns,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }

    /// Minimum similarity ratio for a fuzzy match; values above 1.0 disable it.
    pub fn with_fuzzy_threshold(mut self, threshold: f32) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    pub fn map(&self, headers: &[String]) -> HeaderMap {
        let accepted: Vec<Vec<String>> = self
            .columns
            .iter()
            .map(|column| {
                column
                    .accepted_names()
                    .map(normalize_header)
                    .filter(|name| !name.is_empty())
                    .unique()
                    .collect()
            })
            .collect();
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let mut claimed = vec![false; self.columns.len()];
        let mut shadowed = vec![false; headers.len()];
        let mut entries: Vec<HeaderEntry> = headers
            .iter()
            .map(|header| HeaderEntry {
                header: header.clone(),
                target: HeaderTarget::Unmapped,
                kind: None,
            })
            .collect();

        for (idx, name) in normalized.iter().enumerate() {
            if name.is_empty() {
                continue;
            }
            let Some(column_idx) = accepted.iter().position(|names| names.contains(name)) else {
                continue;
            };
            if claimed[column_idx] {
                warn!(
                    "Header '{}' maps to field '{}' which an earlier header already feeds; ignoring it",
                    headers[idx], self.columns[column_idx].field
                );
                shadowed[idx] = true;
                continue;
            }
            claimed[column_idx] = true;
            entries[idx].target = HeaderTarget::Field(self.columns[column_idx].field.clone());
            entries[idx].kind = Some(MatchKind::Exact);
        }

        if self.fuzzy_threshold <= 1.0 {
            for (idx, name) in normalized.iter().enumerate() {
                if name.is_empty() || shadowed[idx] || entries[idx].kind.is_some() {
                    continue;
                }
                let Some((column_idx, score)) = self.best_fuzzy_match(name, &accepted, &claimed)
                else {
                    continue;
                };
                debug!(
                    "Header '{}' fuzzily matched field '{}' (similarity {score:.2})",
                    headers[idx], self.columns[column_idx].field
                );
                claimed[column_idx] = true;
                entries[idx].target =
                    HeaderTarget::Field(self.columns[column_idx].field.clone());
                entries[idx].kind = Some(MatchKind::Fuzzy);
            }
        }

        HeaderMap { entries }
    }

    fn best_fuzzy_match(
        &self,
        name: &str,
        accepted: &[Vec<String>],
        claimed: &[bool],
    ) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (column_idx, names) in accepted.iter().enumerate() {
            if claimed[column_idx] {
                continue;
            }
            for candidate in names {
                if !numbers(name).eq(numbers(candidate)) {
                    continue;
                }
                let score = TextDiff::from_chars(name, candidate.as_str()).ratio();
                if score < self.fuzzy_threshold {
                    continue;
                }
                if best.is_none_or(|(_, current)| score > current) {
                    best = Some((column_idx, score));
                }
            }
        }
        best
    }
}

/// Runs of digits in a normalized header, in order.
fn numbers(name: &str) -> impl Iterator<Item = &str> {
    name.split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
}
