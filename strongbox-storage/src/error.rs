//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A record, profile or config value in the batch was changed by a
    /// commit after the batch's snapshot was taken.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("invalid backend uri: {0}")]
    InvalidUri(String),

    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("backend is closed")]
    Closed,
}

impl StorageError {
    /// True when retrying the whole transaction may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
