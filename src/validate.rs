//! Per-row validation.
//!
//! Every rule runs independently so one row can carry several errors. Column
//! rules run in column declaration order, cross-field rules after them in
//! rule declaration order.

use itertools::Itertools;

use crate::{
    mapper::MappedRow,
    profile::{ColumnMapping, ImportProfile, ValueKind},
    sanitize::ReferenceTables,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub row_number: usize,
    pub errors: Vec<FieldError>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn messages(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.message.as_str()).collect()
    }

    /// All messages of the row as the single entry reported for it.
    pub fn joined_message(&self) -> String {
        self.errors.iter().map(|e| e.message.as_str()).join("; ")
    }
}

pub struct RowValidator<'a> {
    profile: &'a ImportProfile,
    references: &'a ReferenceTables,
}

impl<'a> RowValidator<'a> {
    pub fn new(profile: &'a ImportProfile, references: &'a ReferenceTables) -> Self {
        Self {
            profile,
            references,
        }
    }

    pub fn validate(&self, row: &MappedRow) -> ValidationOutcome {
        let mut errors = Vec::new();
        for column in &self.profile.columns {
            if let Some(message) = self.check_column(column, row) {
                errors.push(FieldError {
                    field: column.field.clone(),
                    message,
                });
            }
        }
        for rule in &self.profile.rules {
            let satisfied = rule
                .at_least_one_of
                .iter()
                .any(|field| row.value(field).is_some());
            if !satisfied {
                errors.push(FieldError {
                    field: rule.target_field().to_string(),
                    message: self.profile.rule_message(rule),
                });
            }
        }
        ValidationOutcome {
            row_number: row.row_number,
            errors,
        }
    }

    fn check_column(&self, column: &ColumnMapping, row: &MappedRow) -> Option<String> {
        let Some(cell) = row.value(&column.field) else {
            return column.required.then(|| column.required_error());
        };
        let label = column.label();
        let text = cell.as_text().unwrap_or_default();
        if let Some(table) = column.reference.as_deref() {
            return self
                .references
                .resolve(table, &text)
                .is_none()
                .then(|| format!("{label} '{text}' not found"));
        }
        match column.kind {
            ValueKind::Number if cell.as_decimal().is_none() => {
                return Some(format!("{label} must be a number"));
            }
            ValueKind::Date if cell.as_date().is_none() => {
                return Some(format!("{label} must be a valid date"));
            }
            _ => {}
        }
        if !column.allowed_values.is_empty() && column.canonical_allowed_value(&text).is_none() {
            return Some(format!(
                "{label} must be one of: {}",
                column.allowed_values.join(", ")
            ));
        }
        None
    }
}
