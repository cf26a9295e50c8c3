//! The import pipeline.
//!
//! `bytes → sheet → mapped rows → validated rows → sanitized records →
//! duplicate resolution → chunked writes → outcome`. Every stage except the
//! sheet decoder and the store is pure; a run either returns a complete
//! [`BatchOutcome`] or a single [`ImportError`].

use std::collections::HashMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    duplicates::{find_existing_by_key, find_intra_batch_duplicates, reject_duplicates},
    error::ImportError,
    mapper::{DEFAULT_FUZZY_THRESHOLD, FieldMapper},
    profile::ImportProfile,
    reconcile::{ReconcileSettings, RowOutcome, reconcile_outcomes},
    report::{BatchOutcome, summarize},
    sanitize::{ReferenceTables, Sanitizer},
    sheet::{CsvSheetParser, ParsedSheet, SheetLimits, SheetParser},
    store::RecordStore,
    validate::RowValidator,
};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// What happens to rows repeating a natural key already seen in the upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Every row is written; later rows overwrite earlier ones where they meet.
    #[default]
    LastWriteWins,
    /// The first row is kept, later ones fail as duplicates.
    Reject,
}

/// What happens to rows whose natural key is already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpsertMode {
    #[default]
    Upsert,
    Insert,
    RejectExisting,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOptions {
    pub chunk_size: usize,
    /// Leave blank cells out of the written record instead of writing nulls.
    pub skip_empty_cells: bool,
    pub duplicate_policy: DuplicatePolicy,
    pub mode: UpsertMode,
    /// Value stamped into the profile's creator field on insert.
    pub actor: Option<String>,
    pub limits: SheetLimits,
    pub fuzzy_threshold: f32,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            skip_empty_cells: true,
            duplicate_policy: DuplicatePolicy::default(),
            mode: UpsertMode::default(),
            actor: None,
            limits: SheetLimits::default(),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }
}

/// Imports a CSV file held in memory.
pub fn run_import<S: RecordStore + ?Sized>(
    bytes: &[u8],
    profile: &ImportProfile,
    store: &mut S,
    options: &ImportOptions,
) -> Result<BatchOutcome, ImportError> {
    run_import_with(&CsvSheetParser::default(), bytes, profile, store, options)
}

pub fn run_import_with<S: RecordStore + ?Sized>(
    parser: &dyn SheetParser,
    bytes: &[u8],
    profile: &ImportProfile,
    store: &mut S,
    options: &ImportOptions,
) -> Result<BatchOutcome, ImportError> {
    options.limits.check_bytes(bytes)?;
    let sheet = parser.parse(bytes)?;
    import_sheet(&sheet, profile, store, options)
}

pub fn import_sheet<S: RecordStore + ?Sized>(
    sheet: &ParsedSheet,
    profile: &ImportProfile,
    store: &mut S,
    options: &ImportOptions,
) -> Result<BatchOutcome, ImportError> {
    options.limits.check_rows(sheet)?;
    profile
        .validate()
        .map_err(|err| ImportError::InvalidProfile(format!("{err:#}")))?;
    info!(
        "Importing {} row(s) into '{}'",
        sheet.rows.len(),
        profile.entity
    );

    let headers = FieldMapper::new(&profile.columns)
        .with_fuzzy_threshold(options.fuzzy_threshold)
        .map(&sheet.headers);
    info!(
        "Mapped {} of {} header(s)",
        headers.mapped().count(),
        headers.len()
    );
    let unmapped = headers.unmapped_headers();
    if !unmapped.is_empty() {
        debug!("Ignoring unmapped header(s): {unmapped:?}");
    }
    for column in headers.missing_fields(&profile.columns) {
        if column.required {
            warn!(
                "Required field '{}' has no column in the sheet",
                column.field
            );
        }
    }

    let references = ReferenceTables::load(&*store, profile)?;
    let validator = RowValidator::new(profile, &references);
    let sanitizer = Sanitizer::new(profile, &references, options.skip_empty_cells);

    let mut rejected: Vec<RowOutcome> = Vec::new();
    let mut records = Vec::with_capacity(sheet.rows.len());
    let mut skipped_blank_rows = 0usize;
    for row in &sheet.rows {
        let mapped = headers.apply(row);
        if mapped.is_blank() {
            skipped_blank_rows += 1;
            continue;
        }
        let validation = validator.validate(&mapped);
        if !validation.is_valid() {
            rejected.push(RowOutcome::fail(
                mapped.row_number,
                validation.joined_message(),
            ));
            continue;
        }
        records.push(sanitizer.sanitize(&mapped)?);
    }
    debug!(
        "{} row(s) valid, {} invalid, {} blank",
        records.len(),
        rejected.len(),
        skipped_blank_rows
    );

    let key_column = profile.natural_key_column();
    let mut duplicates = Vec::new();
    if let Some(column) = key_column {
        duplicates = find_intra_batch_duplicates(&records, &column.field);
        if !duplicates.is_empty() {
            info!(
                "{} {} value(s) repeat inside the upload",
                duplicates.len(),
                column.label()
            );
        }
        if options.duplicate_policy == DuplicatePolicy::Reject {
            let (kept, repeated) = reject_duplicates(records, &duplicates, column);
            records = kept;
            rejected.extend(repeated);
        }
    }

    let existing = match key_column {
        Some(column) if options.mode != UpsertMode::Insert => {
            let keys: Vec<String> = records
                .iter()
                .filter_map(|record| record.key(&column.field))
                .collect();
            find_existing_by_key(&*store, &column.field, &keys, options.chunk_size)?
        }
        _ => HashMap::new(),
    };

    let settings = ReconcileSettings {
        chunk_size: options.chunk_size,
        mode: options.mode,
        natural_key: key_column,
        creator_field: profile.creator_field.as_deref(),
        actor: options.actor.as_deref(),
    };
    let mut outcomes = reconcile_outcomes(store, records, &existing, &settings)?;
    outcomes.extend(rejected);

    let mut outcome = summarize(&outcomes);
    outcome.duplicates = duplicates;
    outcome.skipped_blank_rows = skipped_blank_rows;
    info!(
        "Import into '{}' finished: {}",
        profile.entity,
        outcome.summary_line()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{profile::ColumnMapping, store::MemoryStore};

    fn profile() -> ImportProfile {
        ImportProfile::new(
            "customers",
            vec![
                ColumnMapping::text("name").required(),
                ColumnMapping::text("phone").required(),
            ],
        )
        .with_natural_key("phone")
    }

    #[test]
    fn invalid_profile_is_fatal() {
        let profile = profile().with_natural_key("email");
        let mut store = MemoryStore::new();
        let err = run_import(b"name,phone\nA,1\n", &profile, &mut store, &ImportOptions::default())
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidProfile(_)));
    }

    #[test]
    fn oversized_input_is_fatal() {
        let options = ImportOptions {
            limits: SheetLimits {
                max_bytes: 8,
                max_rows: 10,
            },
            ..ImportOptions::default()
        };
        let mut store = MemoryStore::new();
        let err = run_import(b"name,phone\nA,1\n", &profile(), &mut store, &options).unwrap_err();
        assert!(matches!(err, ImportError::FileTooLarge { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn insert_mode_skips_existing_lookup() {
        let options = ImportOptions {
            mode: UpsertMode::Insert,
            ..ImportOptions::default()
        };
        let mut store = MemoryStore::new();
        let outcome = run_import(b"name,phone\nA,1\n", &profile(), &mut store, &options).unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(store.calls().find_by_natural_key, 0);
    }

    #[test]
    fn rows_failing_at_different_stages_are_reported_in_row_order() {
        let options = ImportOptions {
            duplicate_policy: DuplicatePolicy::Reject,
            ..ImportOptions::default()
        };
        let mut store = MemoryStore::new();
        let input = "name,phone\nA,1\nB,1\n,2\n";
        let outcome = run_import(input.as_bytes(), &profile(), &mut store, &options).unwrap();
        assert_eq!(outcome.failed_row_numbers(), vec![2, 3]);
        assert_eq!(outcome.errors[0].message, "duplicate phone 1");
        assert_eq!(outcome.errors[1].message, "name is required");
    }
}
