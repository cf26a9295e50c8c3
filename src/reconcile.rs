//! Chunked writes with per-row fallback.
//!
//! Records are planned up front as inserts or updates by looking their
//! natural key up in the map of already stored keys. Each chunk then issues
//! one bulk insert; if the store rejects it, every insert of the chunk is
//! retried on its own so only the offending rows fail. Updates are always
//! written one by one. A store that becomes unavailable aborts the run.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::{
    error::ImportError,
    import::UpsertMode,
    profile::ColumnMapping,
    report::{BatchOutcome, summarize},
    sanitize::SanitizedRecord,
    store::{Record, RecordStore, StoreError},
    value::{FieldValue, RecordId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update(RecordId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    PendingInsert,
    PendingUpdate(RecordId),
    Succeeded(Operation),
    Failed(String),
}

impl RecordState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordState::Succeeded(_) | RecordState::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOutcome {
    pub row_number: usize,
    pub state: RecordState,
}

impl RowOutcome {
    pub fn succeed(row_number: usize, operation: Operation) -> Self {
        Self {
            row_number,
            state: RecordState::Succeeded(operation),
        }
    }

    pub fn fail(row_number: usize, message: impl Into<String>) -> Self {
        Self {
            row_number,
            state: RecordState::Failed(message.into()),
        }
    }

    pub fn failed(&self) -> Option<&str> {
        match &self.state {
            RecordState::Failed(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileSettings<'a> {
    pub chunk_size: usize,
    pub mode: UpsertMode,
    pub natural_key: Option<&'a ColumnMapping>,
    /// Field stamped with `actor` on insert and kept out of update patches.
    pub creator_field: Option<&'a str>,
    pub actor: Option<&'a str>,
}

impl Default for ReconcileSettings<'_> {
    fn default() -> Self {
        Self {
            chunk_size: crate::import::DEFAULT_CHUNK_SIZE,
            mode: UpsertMode::default(),
            natural_key: None,
            creator_field: None,
            actor: None,
        }
    }
}

struct Planned {
    row_number: usize,
    state: RecordState,
    payload: Record,
}

pub fn reconcile<S: RecordStore + ?Sized>(
    store: &mut S,
    records: Vec<SanitizedRecord>,
    existing: &HashMap<String, RecordId>,
    settings: &ReconcileSettings<'_>,
) -> Result<BatchOutcome, ImportError> {
    let outcomes = reconcile_outcomes(store, records, existing, settings)?;
    Ok(summarize(&outcomes))
}

/// Writes `records` and returns one terminal outcome per record, in input order.
pub fn reconcile_outcomes<S: RecordStore + ?Sized>(
    store: &mut S,
    records: Vec<SanitizedRecord>,
    existing: &HashMap<String, RecordId>,
    settings: &ReconcileSettings<'_>,
) -> Result<Vec<RowOutcome>, ImportError> {
    let chunk_size = settings.chunk_size.max(1);
    let total = records.len();
    let mut outcomes = Vec::with_capacity(total);
    let mut records = records.into_iter().peekable();
    let mut chunk_index = 0usize;
    while records.peek().is_some() {
        chunk_index += 1;
        let chunk: Vec<Planned> = records
            .by_ref()
            .take(chunk_size)
            .map(|record| plan(record, existing, settings))
            .collect();
        debug!("Writing chunk {chunk_index} with {} record(s)", chunk.len());
        outcomes.extend(write_chunk(store, chunk, chunk_index)?);
    }
    info!("Reconciled {total} record(s) in {chunk_index} chunk(s)");
    Ok(outcomes)
}

fn plan(
    record: SanitizedRecord,
    existing: &HashMap<String, RecordId>,
    settings: &ReconcileSettings<'_>,
) -> Planned {
    let SanitizedRecord {
        row_number,
        mut values,
        ..
    } = record;
    let found = settings.natural_key.and_then(|column| {
        let key = values.get(&column.field).and_then(FieldValue::as_key)?;
        existing.get(&key).map(|id| (column, *id))
    });
    let state = match (found, settings.mode) {
        (Some((_, id)), UpsertMode::Upsert) => RecordState::PendingUpdate(id),
        (Some((column, _)), UpsertMode::RejectExisting) => {
            let value = values
                .get(&column.field)
                .map(ToString::to_string)
                .unwrap_or_default();
            RecordState::Failed(format!("{} {value} already exists", column.label()))
        }
        _ => RecordState::PendingInsert,
    };
    if let Some(field) = settings.creator_field {
        match (&state, settings.actor) {
            (RecordState::PendingInsert, Some(actor)) => {
                values.insert(field.to_string(), FieldValue::Text(actor.to_string()));
            }
            (RecordState::PendingUpdate(_), _) => {
                values.remove(field);
            }
            _ => {}
        }
    }
    Planned {
        row_number,
        state,
        payload: values,
    }
}

fn write_chunk<S: RecordStore + ?Sized>(
    store: &mut S,
    mut chunk: Vec<Planned>,
    chunk_index: usize,
) -> Result<Vec<RowOutcome>, ImportError> {
    let inserts: Vec<usize> = chunk
        .iter()
        .enumerate()
        .filter(|(_, planned)| planned.state == RecordState::PendingInsert)
        .map(|(idx, _)| idx)
        .collect();
    if !inserts.is_empty() {
        let payloads: Vec<Record> = inserts.iter().map(|idx| chunk[*idx].payload.clone()).collect();
        match store.insert_many(&payloads) {
            Ok(()) => {
                for idx in &inserts {
                    chunk[*idx].state = RecordState::Succeeded(Operation::Insert);
                }
            }
            Err(StoreError::Rejected(reason)) => {
                warn!(
                    "Bulk insert of chunk {chunk_index} rejected ({reason}); retrying {} row(s) individually",
                    inserts.len()
                );
                for idx in &inserts {
                    chunk[*idx].state = match store.insert_one(&chunk[*idx].payload) {
                        Ok(_) => RecordState::Succeeded(Operation::Insert),
                        Err(StoreError::Rejected(message)) => RecordState::Failed(message),
                        Err(fatal) => return Err(fatal.into()),
                    };
                }
            }
            Err(fatal) => return Err(fatal.into()),
        }
    }

    for planned in chunk.iter_mut() {
        let RecordState::PendingUpdate(id) = planned.state else {
            continue;
        };
        planned.state = match store.update_one(id, &planned.payload) {
            Ok(()) => RecordState::Succeeded(Operation::Update(id)),
            Err(StoreError::Rejected(message)) => RecordState::Failed(message),
            Err(fatal) => return Err(fatal.into()),
        };
    }

    Ok(chunk
        .into_iter()
        .map(|planned| RowOutcome {
            row_number: planned.row_number,
            state: planned.state,
        })
        .collect())
}
