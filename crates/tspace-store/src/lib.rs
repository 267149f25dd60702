//! Version record persistence for table spaces.
//!
//! A table space instantiation remembers which version of each entity is
//! current. This crate stores those `(namespace, instance_key, entity) ->
//! version` records.
//!
//! # Modules
//!
//! - [`error`] -- Error types for store operations
//! - [`traits`] -- The [`VersionStore`] trait and the shared upsert rules
//! - [`memory`] -- In-memory [`InMemoryVersionStore`] for tests
//! - [`file`] -- JSON-file [`FileVersionStore`] with atomic replacement

pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use error::{Result, StoreError};
pub use file::FileVersionStore;
pub use memory::InMemoryVersionStore;
pub use traits::{apply_versions, UpsertSummary, VersionMap, VersionStore};
