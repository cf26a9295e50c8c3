//! Natural-key collisions, inside the upload and against stored records.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use serde::Serialize;

use crate::{
    profile::ColumnMapping,
    reconcile::RowOutcome,
    sanitize::SanitizedRecord,
    store::{RecordStore, StoreError},
    value::{RecordId, normalize_key},
};

/// Rows of one upload sharing a natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub key: String,
    pub row_numbers: Vec<usize>,
}

/// Groups of two or more records with the same normalized `field` value,
/// ordered by the first row of each group. Records without a key are ignored.
pub fn find_intra_batch_duplicates(
    records: &[SanitizedRecord],
    field: &str,
) -> Vec<DuplicateGroup> {
    let mut order: Vec<String> = Vec::new();
    let mut rows: HashMap<String, Vec<usize>> = HashMap::new();
    for record in records {
        let Some(key) = record.key(field) else {
            continue;
        };
        let entry = rows.entry(key.clone()).or_default();
        if entry.is_empty() {
            order.push(key);
        }
        entry.push(record.row_number);
    }
    order
        .into_iter()
        .filter_map(|key| {
            let row_numbers = rows.remove(&key)?;
            (row_numbers.len() > 1).then_some(DuplicateGroup { key, row_numbers })
        })
        .collect()
}

/// Looks up which `keys` already exist in the store, `chunk_size` keys per query.
pub fn find_existing_by_key<S: RecordStore + ?Sized>(
    store: &S,
    field: &str,
    keys: &[String],
    chunk_size: usize,
) -> Result<HashMap<String, RecordId>, StoreError> {
    let mut seen = HashSet::new();
    let unique: Vec<String> = keys
        .iter()
        .map(|key| normalize_key(key))
        .filter(|key| !key.is_empty() && seen.insert(key.clone()))
        .collect();
    let mut existing = HashMap::new();
    for chunk in unique.chunks(chunk_size.max(1)) {
        let found = store.find_by_natural_key(field, chunk)?;
        existing.extend(found.into_iter().map(|(key, id)| (normalize_key(&key), id)));
    }
    debug!(
        "{} of {} natural key(s) already stored",
        existing.len(),
        unique.len()
    );
    Ok(existing)
}

/// Keeps the first record of every group and fails the others.
pub fn reject_duplicates(
    records: Vec<SanitizedRecord>,
    groups: &[DuplicateGroup],
    column: &ColumnMapping,
) -> (Vec<SanitizedRecord>, Vec<RowOutcome>) {
    let later: HashSet<usize> = groups
        .iter()
        .flat_map(|group| group.row_numbers.iter().skip(1).copied())
        .collect();
    if later.is_empty() {
        return (records, Vec::new());
    }
    info!("Rejecting {} row(s) with a repeated {}", later.len(), column.label());
    let mut kept = Vec::with_capacity(records.len());
    let mut failed = Vec::new();
    for record in records {
        if later.contains(&record.row_number) {
            let value = record
                .value(&column.field)
                .map(ToString::to_string)
                .unwrap_or_default();
            failed.push(RowOutcome::fail(
                record.row_number,
                format!("duplicate {} {value}", column.label()),
            ));
        } else {
            kept.push(record);
        }
    }
    (kept, failed)
}
