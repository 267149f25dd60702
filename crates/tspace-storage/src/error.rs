//! Error types for physical table operations.

use thiserror::Error;

/// Errors that can occur while manipulating physical tables.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The named table does not exist.
    #[error("table not found: {table}")]
    TableNotFound { table: String },

    /// Rows cannot be copied between tables with different columns.
    #[error("schema mismatch copying {from} into {to}")]
    SchemaMismatch { from: String, to: String },

    /// A schema statement could not be rewritten for the target table.
    #[error("schema error: {0}")]
    Schema(String),

    /// The underlying backend reported a failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Convenience type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
