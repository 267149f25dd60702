//! Error types for version store operations.

use thiserror::Error;

/// Errors that can occur while reading or writing version records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A lock guarding the records was poisoned by a panicking writer.
    #[error("version store lock poisoned: {0}")]
    Poisoned(String),

    /// I/O error from a file-backed store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for version store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
