use thiserror::Error;

use crate::store::StoreError;

/// Conditions that abort an import before a [`crate::BatchOutcome`] exists.
///
/// Row-level problems never surface here; they are reported per row inside
/// the outcome instead.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("input file is empty")]
    EmptyFile,
    #[error("input file is {size} bytes, larger than the {limit} byte limit")]
    FileTooLarge { size: usize, limit: usize },
    #[error("sheet has {rows} data rows, more than the {limit} row limit")]
    TooManyRows { rows: usize, limit: usize },
    #[error("could not read sheet: {0}")]
    Sheet(String),
    #[error("invalid import profile: {0}")]
    InvalidProfile(String),
    #[error("row {row}: value '{value}' of field '{field}' passed validation but has no reference match")]
    UnresolvedReference {
        row: usize,
        field: String,
        value: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}
