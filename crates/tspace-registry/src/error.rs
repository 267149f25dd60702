//! Error types for table space operations.

use thiserror::Error;
use tspace_storage::StorageError;
use tspace_store::StoreError;
use tspace_types::NamingError;

/// Errors raised by entity spaces, contexts, and the registry.
///
/// None of these are retried or swallowed internally; the only local
/// recovery is reverting a working version when staging fails.
#[derive(Debug, Error)]
pub enum TablespaceError {
    /// No entity space exists under this name.
    #[error("no such namespace: {namespace}")]
    UnknownNamespace { namespace: String },

    /// The namespace is already active with a different instance key.
    #[error(
        "namespace {namespace} is already active with instance key {active_key:?}, \
         cannot activate {requested_key:?}"
    )]
    ConflictingActivation {
        namespace: String,
        active_key: String,
        requested_key: String,
    },

    /// Neither the entity nor any of its ancestors is registered in the space.
    #[error("{entity} is not registered in namespace {namespace}")]
    NotRegistered { entity: String, namespace: String },

    /// The entity is not bound to any namespace.
    #[error("{entity} is not registered to any namespace")]
    Unbound { entity: String },

    /// Registration options contained keys that are not understood.
    #[error("unknown registration options for {entity}: {}", .keys.join(", "))]
    UnknownOption { entity: String, keys: Vec<String> },

    /// A registration option had an unusable value.
    #[error("invalid registration option {key} for {entity}: {reason}")]
    InvalidOption {
        entity: String,
        key: String,
        reason: String,
    },

    /// Hoovering would discard staged but uncommitted versions.
    #[error(
        "cannot hoover {namespace}/{instance_key} with active working versions: {}",
        .entities.join(", ")
    )]
    ActiveWorkingVersions {
        namespace: String,
        instance_key: String,
        entities: Vec<String>,
    },

    /// The namespace has no active context on this thread.
    #[error("namespace {namespace} has no active context")]
    NoActiveContext { namespace: String },

    /// The instantiation cannot be destroyed while it is active.
    #[error("namespace {namespace} is active with instance key {instance_key:?}")]
    InstanceActive {
        namespace: String,
        instance_key: String,
    },

    /// A physical name could not be formed.
    #[error("naming error: {0}")]
    InvalidNaming(#[from] NamingError),

    /// Version store failure.
    #[error("version store error: {0}")]
    Store(#[from] StoreError),

    /// Physical storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Convenience type alias for table space operations.
pub type Result<T> = std::result::Result<T, TablespaceError>;
