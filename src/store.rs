//! Record store seam and the bundled stores.
//!
//! The engine only talks to persistence through [`RecordStore`]. Two
//! implementations ship with the crate:
//!
//! - [`MemoryStore`]: records held in memory, optional unique-field
//!   constraints, named reference tables and an availability switch for
//!   simulating outages.
//! - [`JsonFileStore`]: a [`MemoryStore`] loaded from and saved to a JSON
//!   document, used by the command line.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{FieldValue, RecordId, normalize_key};

/// Field values of one record keyed by canonical field.
pub type Record = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store refused the write; other writes may still succeed.
    #[error("{0}")]
    Rejected(String),
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub trait RecordStore {
    /// Inserts every record or none of them.
    fn insert_many(&mut self, records: &[Record]) -> Result<(), StoreError>;

    fn insert_one(&mut self, record: &Record) -> Result<RecordId, StoreError>;

    /// Merges `patch` into the stored record; fields absent from the patch keep their value.
    fn update_one(&mut self, id: RecordId, patch: &Record) -> Result<(), StoreError>;

    /// Looks up existing records whose `field` matches one of `keys`.
    ///
    /// Keys are compared in normalized form and the returned map is keyed by
    /// the normalized value.
    fn find_by_natural_key(
        &self,
        field: &str,
        keys: &[String],
    ) -> Result<HashMap<String, RecordId>, StoreError>;

    /// Name (or code) to id map of a reference table.
    fn find_reference_table(&self, name: &str) -> Result<HashMap<String, RecordId>, StoreError>;
}

/// Number of calls each store operation received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub insert_many: usize,
    pub insert_one: usize,
    pub update_one: usize,
    pub find_by_natural_key: usize,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    records: BTreeMap<RecordId, Record>,
    next_id: RecordId,
    unique_fields: Vec<String>,
    /// Unique field -> normalized key -> number of stored records holding it.
    unique_index: HashMap<String, HashMap<String, usize>>,
    reference_tables: HashMap<String, HashMap<String, RecordId>>,
    available: bool,
    calls: std::cell::Cell<CallCounts>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            next_id: 1,
            unique_fields: Vec::new(),
            unique_index: HashMap::new(),
            reference_tables: HashMap::new(),
            available: true,
            calls: std::cell::Cell::new(CallCounts::default()),
        }
    }

    pub fn with_unique_field(mut self, field: &str) -> Self {
        if !self.unique_fields.iter().any(|existing| existing == field) {
            self.unique_fields.push(field.to_string());
            let mut index: HashMap<String, usize> = HashMap::new();
            for record in self.records.values() {
                if let Some(key) = record.get(field).and_then(FieldValue::as_key) {
                    *index.entry(key).or_default() += 1;
                }
            }
            self.unique_index.insert(field.to_string(), index);
        }
        self
    }

    /// Registers a reference table; entry names are matched case-insensitively.
    pub fn with_reference_table<I, S>(mut self, name: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (S, RecordId)>,
        S: AsRef<str>,
    {
        let table = self.reference_tables.entry(name.to_string()).or_default();
        for (entry, id) in entries {
            table.insert(normalize_key(entry.as_ref()), id);
        }
        self
    }

    pub fn with_record(mut self, record: Record) -> Self {
        let id = self.allocate_id();
        self.put(id, record);
        self
    }

    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    pub fn records(&self) -> impl Iterator<Item = (RecordId, &Record)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn calls(&self) -> CallCounts {
        self.calls.get()
    }

    /// Stored records whose `field` renders as `value` (normalized).
    pub fn find(&self, field: &str, value: &str) -> Vec<RecordId> {
        let wanted = normalize_key(value);
        self.records
            .iter()
            .filter(|(_, record)| {
                record
                    .get(field)
                    .and_then(FieldValue::as_key)
                    .is_some_and(|key| key == wanted)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    fn count(&self, bump: impl FnOnce(&mut CallCounts)) {
        let mut counts = self.calls.get();
        bump(&mut counts);
        self.calls.set(counts);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available {
            Ok(())
        } else {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn allocate_id(&mut self) -> RecordId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Stores `record` under `id`, keeping the unique index in step.
    fn put(&mut self, id: RecordId, record: Record) {
        if let Some(previous) = self.records.remove(&id) {
            self.reindex(&previous, false);
        }
        self.reindex(&record, true);
        self.records.insert(id, record);
    }

    fn reindex(&mut self, record: &Record, add: bool) {
        for field in &self.unique_fields {
            let Some(key) = record.get(field).and_then(FieldValue::as_key) else {
                continue;
            };
            let index = self.unique_index.entry(field.clone()).or_default();
            if add {
                *index.entry(key).or_default() += 1;
            } else if let Some(held) = index.get_mut(&key) {
                *held -= 1;
                if *held == 0 {
                    index.remove(&key);
                }
            }
        }
    }

    /// Checks `record` against the unique fields of the stored records, not
    /// counting `replacing` (the stored version of the record being updated),
    /// and against the `pending` records of the same write.
    fn check_unique(
        &self,
        record: &Record,
        replacing: Option<&Record>,
        pending: &[HashSet<String>],
    ) -> Result<(), StoreError> {
        for (idx, field) in self.unique_fields.iter().enumerate() {
            let Some(key) = record.get(field).and_then(FieldValue::as_key) else {
                continue;
            };
            let mut held = self
                .unique_index
                .get(field)
                .and_then(|index| index.get(&key))
                .copied()
                .unwrap_or(0);
            let kept = replacing
                .and_then(|old| old.get(field))
                .and_then(FieldValue::as_key)
                .is_some_and(|old_key| old_key == key);
            if kept {
                held = held.saturating_sub(1);
            }
            let clash = held > 0 || pending.get(idx).is_some_and(|seen| seen.contains(&key));
            if clash {
                return Err(StoreError::Rejected(format!(
                    "duplicate key value violates unique constraint \"{field}\": {key}"
                )));
            }
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn insert_many(&mut self, records: &[Record]) -> Result<(), StoreError> {
        self.count(|c| c.insert_many += 1);
        self.ensure_available()?;
        let mut pending = vec![HashSet::new(); self.unique_fields.len()];
        for record in records {
            self.check_unique(record, None, &pending)?;
            for (idx, field) in self.unique_fields.iter().enumerate() {
                if let Some(key) = record.get(field).and_then(FieldValue::as_key) {
                    pending[idx].insert(key);
                }
            }
        }
        for record in records {
            let id = self.allocate_id();
            self.put(id, record.clone());
        }
        debug!("Stored {} record(s) in one write", records.len());
        Ok(())
    }

    fn insert_one(&mut self, record: &Record) -> Result<RecordId, StoreError> {
        self.count(|c| c.insert_one += 1);
        self.ensure_available()?;
        self.check_unique(record, None, &[])?;
        let id = self.allocate_id();
        self.put(id, record.clone());
        Ok(id)
    }

    fn update_one(&mut self, id: RecordId, patch: &Record) -> Result<(), StoreError> {
        self.count(|c| c.update_one += 1);
        self.ensure_available()?;
        let Some(current) = self.records.get(&id) else {
            return Err(StoreError::Rejected(format!("record {id} does not exist")));
        };
        let mut merged = current.clone();
        merged.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.check_unique(&merged, Some(current), &[])?;
        self.put(id, merged);
        Ok(())
    }

    fn find_by_natural_key(
        &self,
        field: &str,
        keys: &[String],
    ) -> Result<HashMap<String, RecordId>, StoreError> {
        self.count(|c| c.find_by_natural_key += 1);
        self.ensure_available()?;
        let wanted: HashSet<String> = keys.iter().map(|key| normalize_key(key)).collect();
        let mut found = HashMap::new();
        for (id, record) in &self.records {
            if let Some(key) = record.get(field).and_then(FieldValue::as_key)
                && wanted.contains(&key)
            {
                found.entry(key).or_insert(*id);
            }
        }
        Ok(found)
    }

    fn find_reference_table(&self, name: &str) -> Result<HashMap<String, RecordId>, StoreError> {
        self.ensure_available()?;
        self.reference_tables
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::Rejected(format!("unknown reference table '{name}'")))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    next_id: RecordId,
    #[serde(default)]
    unique_fields: Vec<String>,
    #[serde(default)]
    records: Vec<StoredRecord>,
    #[serde(default)]
    references: BTreeMap<String, BTreeMap<String, RecordId>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    id: RecordId,
    fields: BTreeMap<String, serde_json::Value>,
}

/// A [`MemoryStore`] persisted as one JSON document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Opens `path`, starting from an empty store when the file does not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let document = if path.exists() {
            let file = File::open(path).with_context(|| format!("Opening store {path:?}"))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Parsing store {path:?}"))?
        } else {
            StoreDocument::default()
        };
        let mut inner = MemoryStore::new();
        for field in &document.unique_fields {
            inner = inner.with_unique_field(field);
        }
        for (name, entries) in &document.references {
            inner = inner.with_reference_table(name, entries.iter().map(|(k, v)| (k, *v)));
        }
        for stored in document.records {
            let record = stored
                .fields
                .iter()
                .map(|(field, value)| (field.clone(), FieldValue::from_json(value)))
                .collect();
            inner.put(stored.id, record);
            inner.next_id = inner.next_id.max(stored.id + 1);
        }
        inner.next_id = inner.next_id.max(document.next_id);
        debug!("Opened store {:?} with {} record(s)", path, inner.len());
        Ok(Self {
            path: path.to_path_buf(),
            inner,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn save(&self) -> Result<()> {
        let document = StoreDocument {
            next_id: self.inner.next_id,
            unique_fields: self.inner.unique_fields.clone(),
            records: self
                .inner
                .records
                .iter()
                .map(|(id, record)| StoredRecord {
                    id: *id,
                    fields: record
                        .iter()
                        .map(|(field, value)| (field.clone(), value.to_json()))
                        .collect(),
                })
                .collect(),
            references: self
                .inner
                .reference_tables
                .iter()
                .map(|(name, entries)| {
                    (
                        name.clone(),
                        entries.iter().map(|(k, v)| (k.clone(), *v)).collect(),
                    )
                })
                .collect(),
        };
        let file =
            File::create(&self.path).with_context(|| format!("Creating store {:?}", self.path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &document)
            .with_context(|| format!("Writing store {:?}", self.path))?;
        writer
            .flush()
            .with_context(|| format!("Flushing store {:?}", self.path))
    }
}

impl RecordStore for JsonFileStore {
    fn insert_many(&mut self, records: &[Record]) -> Result<(), StoreError> {
        self.inner.insert_many(records)
    }

    fn insert_one(&mut self, record: &Record) -> Result<RecordId, StoreError> {
        self.inner.insert_one(record)
    }

    fn update_one(&mut self, id: RecordId, patch: &Record) -> Result<(), StoreError> {
        self.inner.update_one(id, patch)
    }

    fn find_by_natural_key(
        &self,
        field: &str,
        keys: &[String],
    ) -> Result<HashMap<String, RecordId>, StoreError> {
        self.inner.find_by_natural_key(field, keys)
    }

    fn find_reference_table(&self, name: &str) -> Result<HashMap<String, RecordId>, StoreError> {
        self.inner.find_reference_table(name)
    }
}
