//! Import outcome aggregation and rendering.

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::{
    duplicates::DuplicateGroup,
    reconcile::{Operation, RecordState, RowOutcome},
    table::TextTable,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row_number: usize,
    pub message: String,
}

/// Result of one import run.
///
/// `inserted + updated + failed_rows()` equals the number of non-blank rows
/// submitted; errors are keyed by the row number visible in the sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub errors: Vec<RowError>,
    /// Natural keys repeated inside the upload; informational unless duplicates are rejected.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub duplicates: Vec<DuplicateGroup>,
    pub skipped_blank_rows: usize,
}

impl BatchOutcome {
    /// Number of distinct rows with at least one error.
    pub fn failed_rows(&self) -> usize {
        self.failed_row_numbers().len()
    }

    pub fn processed_rows(&self) -> usize {
        self.inserted + self.updated + self.failed_rows()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} inserted, {} updated, {} errors",
            self.inserted,
            self.updated,
            self.errors.len()
        )
    }

    pub fn error_for(&self, row_number: usize) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.row_number == row_number)
            .map(|e| e.message.as_str())
    }

    /// Failed row numbers, ascending; the rows to fix and resubmit.
    pub fn failed_row_numbers(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.errors.iter().map(|e| e.row_number).collect();
        rows.sort_unstable();
        rows.dedup();
        rows
    }
}

/// Folds per-row outcomes into a [`BatchOutcome`], errors sorted by row number.
pub fn summarize(outcomes: &[RowOutcome]) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for row in outcomes {
        match &row.state {
            RecordState::Succeeded(Operation::Insert) => outcome.inserted += 1,
            RecordState::Succeeded(Operation::Update(_)) => outcome.updated += 1,
            RecordState::Failed(message) => outcome.errors.push(RowError {
                row_number: row.row_number,
                message: message.clone(),
            }),
            RecordState::PendingInsert | RecordState::PendingUpdate(_) => {}
        }
    }
    outcome.errors.sort_by_key(|e| e.row_number);
    outcome
}

pub fn render_error_table(outcome: &BatchOutcome) -> String {
    let mut table = TextTable::new(["row", "error"]);
    for error in &outcome.errors {
        table.push_row([error.row_number.to_string(), error.message.clone()]);
    }
    table.render()
}

/// Writes the failed rows as a `row,error` CSV.
pub fn write_error_report<W: Write>(outcome: &BatchOutcome, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer
        .write_record(["row", "error"])
        .context("Writing error report header")?;
    for error in &outcome.errors {
        writer
            .write_record([error.row_number.to_string().as_str(), error.message.as_str()])
            .with_context(|| format!("Writing error report row {}", error.row_number))?;
    }
    writer.flush().context("Flushing error report")?;
    Ok(())
}
