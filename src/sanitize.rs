//! Canonical typing of validated rows.
//!
//! ## Responsibilities
//!
//! - Trim text, turn blanks into nulls (or omit them from the payload)
//! - Parse numbers and dates into [`FieldValue`]s
//! - Store domain values in their declared spelling
//! - Resolve reference names into record ids through [`ReferenceTables`]

use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::{
    error::ImportError,
    mapper::MappedRow,
    profile::{ColumnMapping, ImportProfile, ValueKind},
    store::{Record, RecordStore, StoreError},
    value::{CellValue, FieldValue, RecordId, normalize_key},
};

/// Name to id lookups for every reference table a profile uses.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTables {
    tables: HashMap<String, HashMap<String, RecordId>>,
}

impl ReferenceTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<S: RecordStore + ?Sized>(
        store: &S,
        profile: &ImportProfile,
    ) -> Result<Self, StoreError> {
        let mut tables = Self::new();
        for name in profile.reference_tables() {
            let entries = store.find_reference_table(name)?;
            debug!("Loaded reference table '{name}' with {} entries", entries.len());
            tables.tables.insert(
                name.to_string(),
                entries
                    .into_iter()
                    .map(|(key, id)| (normalize_key(&key), id))
                    .collect(),
            );
        }
        Ok(tables)
    }

    pub fn insert(&mut self, table: &str, name: &str, id: RecordId) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(normalize_key(name), id);
    }

    /// Resolves a display name or code; integer literals are taken as ids.
    pub fn resolve(&self, table: &str, value: &str) -> Option<RecordId> {
        self.tables
            .get(table)
            .and_then(|entries| entries.get(&normalize_key(value)).copied())
            .or_else(|| value.trim().parse::<RecordId>().ok())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedRecord {
    pub row_number: usize,
    pub values: Record,
    /// Reference columns and the ids their cell values resolved to.
    pub resolved_foreign_keys: BTreeMap<String, RecordId>,
}

impl SanitizedRecord {
    pub fn new(row_number: usize, values: Record) -> Self {
        Self {
            row_number,
            values,
            resolved_foreign_keys: BTreeMap::new(),
        }
    }

    pub fn value(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field).filter(|value| !value.is_null())
    }

    /// Normalized value of `field`, used for duplicate detection.
    pub fn key(&self, field: &str) -> Option<String> {
        self.values.get(field).and_then(FieldValue::as_key)
    }
}

pub struct Sanitizer<'a> {
    profile: &'a ImportProfile,
    references: &'a ReferenceTables,
    skip_empty_cells: bool,
}

impl<'a> Sanitizer<'a> {
    pub fn new(
        profile: &'a ImportProfile,
        references: &'a ReferenceTables,
        skip_empty_cells: bool,
    ) -> Self {
        Self {
            profile,
            references,
            skip_empty_cells,
        }
    }

    /// Types one row that passed validation.
    ///
    /// An unresolvable reference here means validation let it through, which
    /// is reported as [`ImportError::UnresolvedReference`] instead of a row error.
    pub fn sanitize(&self, row: &MappedRow) -> Result<SanitizedRecord, ImportError> {
        let mut record = SanitizedRecord::new(row.row_number, Record::new());
        for column in &self.profile.columns {
            let Some(cell) = row.value(&column.field) else {
                if !self.skip_empty_cells {
                    record.values.insert(column.field.clone(), FieldValue::Null);
                }
                continue;
            };
            let value = match column.reference.as_deref() {
                Some(table) => {
                    let text = cell.as_text().unwrap_or_default();
                    let id = self.references.resolve(table, &text).ok_or_else(|| {
                        ImportError::UnresolvedReference {
                            row: row.row_number,
                            field: column.field.clone(),
                            value: text.clone(),
                        }
                    })?;
                    record.resolved_foreign_keys.insert(column.field.clone(), id);
                    FieldValue::Id(id)
                }
                None => coerce(column, cell),
            };
            record.values.insert(column.field.clone(), value);
        }
        Ok(record)
    }
}

fn coerce(column: &ColumnMapping, cell: &CellValue) -> FieldValue {
    match column.kind {
        ValueKind::Text => match cell.as_text() {
            Some(text) => match column.canonical_allowed_value(&text) {
                Some(canonical) => FieldValue::Text(canonical.to_string()),
                None => FieldValue::Text(text),
            },
            None => FieldValue::Null,
        },
        ValueKind::Number => cell
            .as_decimal()
            .map(FieldValue::Number)
            .unwrap_or(FieldValue::Null),
        ValueKind::Date => cell
            .as_date()
            .map(FieldValue::Date)
            .unwrap_or(FieldValue::Null),
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;
    use crate::store::MemoryStore;

    fn profile() -> ImportProfile {
        ImportProfile::new(
            "contacts",
            vec![
                ColumnMapping::text("name").required(),
                ColumnMapping::number("revenue"),
                ColumnMapping::date("birthday"),
                ColumnMapping::text("gender").with_allowed_values(["Nam", "Nữ"]),
                ColumnMapping::text("customer_id").with_reference("customers"),
            ],
        )
    }

    fn row(cells: &[(&str, CellValue)]) -> MappedRow {
        MappedRow::new(3, cells.iter().map(|(k, v)| (*k, v.clone())))
    }

    #[test]
    fn values_are_typed_per_column_kind() {
        let profile = profile();
        let mut refs = ReferenceTables::new();
        refs.insert("customers", "Acme", 42);
        let record = Sanitizer::new(&profile, &refs, true)
            .sanitize(&row(&[
                ("name", " Lan ".into()),
                ("revenue", "1.234,5".into()),
                ("birthday", CellValue::Number(45000.0)),
                ("gender", "nữ".into()),
                ("customer_id", "ACME".into()),
            ]))
            .unwrap();
        assert_eq!(record.row_number, 3);
        assert_eq!(record.values["name"], FieldValue::Text("Lan".into()));
        assert_eq!(
            record.values["revenue"],
            FieldValue::Number(Decimal::from_str("1234.5").unwrap())
        );
        assert_eq!(
            record.values["birthday"],
            FieldValue::Date(NaiveDate::from_ymd_opt(2023, 3, 15).unwrap())
        );
        assert_eq!(record.values["gender"], FieldValue::Text("Nữ".into()));
        assert_eq!(record.values["customer_id"], FieldValue::Id(42));
        assert_eq!(record.resolved_foreign_keys["customer_id"], 42);
    }

    #[test]
    fn blank_cells_are_omitted_or_nulled() {
        let profile = profile();
        let refs = ReferenceTables::new();
        let input = row(&[("name", "Lan".into()), ("revenue", "  ".into())]);

        let skipped = Sanitizer::new(&profile, &refs, true).sanitize(&input).unwrap();
        assert_eq!(skipped.values.len(), 1);

        let kept = Sanitizer::new(&profile, &refs, false).sanitize(&input).unwrap();
        assert_eq!(kept.values.len(), 5);
        assert_eq!(kept.values["revenue"], FieldValue::Null);
        assert_eq!(kept.value("revenue"), None);
    }

    #[test]
    fn unparseable_optional_numbers_become_null() {
        let profile = profile();
        let refs = ReferenceTables::new();
        let record = Sanitizer::new(&profile, &refs, true)
            .sanitize(&row(&[("name", "Lan".into()), ("revenue", "n/a".into())]))
            .unwrap();
        assert_eq!(record.values["revenue"], FieldValue::Null);
    }

    #[test]
    fn numeric_references_are_literal_ids() {
        let refs = ReferenceTables::new();
        assert_eq!(refs.resolve("customers", " 17 "), Some(17));
        assert_eq!(refs.resolve("customers", "Acme"), None);
    }

    #[test]
    fn unresolved_reference_is_an_invariant_breach() {
        let profile = profile();
        let refs = ReferenceTables::new();
        let err = Sanitizer::new(&profile, &refs, true)
            .sanitize(&row(&[("name", "Lan".into()), ("customer_id", "Ghost".into())]))
            .unwrap_err();
        assert!(matches!(
            err,
            ImportError::UnresolvedReference { row: 3, ref field, .. } if field == "customer_id"
        ));
    }

    #[test]
    fn reference_tables_load_from_store() {
        let profile = profile();
        let store = MemoryStore::new().with_reference_table("customers", [("Acme Co", 5), ("AC01", 5)]);
        let refs = ReferenceTables::load(&store, &profile).unwrap();
        assert_eq!(refs.resolve("customers", "acme co"), Some(5));
        assert_eq!(refs.resolve("customers", "ac01"), Some(5));
    }
}
