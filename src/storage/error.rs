//! Storage layer error types.

use thiserror::Error;

use crate::access::tuple::FilePointer;
use crate::storage::file::FileKind;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("Page not found: page {page_no} of file {file}")]
    PageNotFound { file: String, page_no: u32 },

    #[error("Unrecognized file kind tag: {0}")]
    UnrecognizedFileKind(u8),

    #[error("File {file} has kind {found:?}, expected {expected:?}")]
    WrongFileKind {
        file: String,
        expected: FileKind,
        found: FileKind,
    },

    #[error("Invalid page size: {0}")]
    InvalidPageSize(usize),

    #[error("Tuple not found: slot {slot_id} is empty or deleted")]
    TupleNotFound { slot_id: u16 },

    #[error("Invalid slot ID: {slot_id} (slots: {num_slots})")]
    InvalidSlotId { slot_id: u16, num_slots: u16 },

    #[error("Invalid tuple locator: {0}")]
    InvalidLocator(FilePointer),

    #[error("Capacity exceeded: requires {required} bytes but only {available} available")]
    CapacityExceeded { required: usize, available: usize },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("No transaction is in progress")]
    NoTransaction,

    #[error("A transaction is already in progress")]
    TransactionInProgress,

    #[error("Recovery failed: {0}")]
    Recovery(String),
}

impl StorageError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        StorageError::InvariantViolation(msg.into())
    }

    /// Whether the error reports something absent, as opposed to something broken.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::FileNotFound(_)
                | StorageError::PageNotFound { .. }
                | StorageError::TupleNotFound { .. }
        )
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Schema(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
