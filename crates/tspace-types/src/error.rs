//! Error types for the naming scheme.

use thiserror::Error;

/// Errors produced while computing physical names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NamingError {
    /// An instance key was supplied without the namespace it belongs to.
    #[error("instance key {instance_key:?} given without a namespace (base name: {base_name})")]
    InstanceKeyWithoutNamespace {
        instance_key: String,
        base_name: String,
    },
}

/// Convenience alias for naming operations.
pub type Result<T> = std::result::Result<T, NamingError>;
