use thiserror::Error;

/// Errors that can occur during scheduled job record operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No scheduled job row exists with this id.
    #[error("scheduled job not found: {id}")]
    NotFound { id: i64 },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The record cannot be written as given (e.g. update without an id).
    #[error("invalid scheduled job record: {0}")]
    InvalidRecord(String),

    /// Two parameters on one job share a key.
    #[error("duplicate scheduledJobParameter key: {key}")]
    DuplicateParameter { key: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
