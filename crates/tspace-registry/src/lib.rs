//! Versioned table spaces.
//!
//! Entities are registered into named entity spaces. Activating a space under
//! an instance key gives every registered entity a physical table name that
//! depends on its version. Staging a new version moves writes onto the next
//! table in a small ring, committing records the new version, and hoovering
//! collapses the ring back onto the base table.
//!
//! # Modules
//!
//! - [`options`] -- [`RegistrationOptions`] and dynamic option parsing
//! - [`space`] -- [`EntitySpace`] registrations and the [`Backends`] they use
//! - [`context`] -- [`Context`], the staging/commit/hoover state machine
//! - [`registry`] -- [`Registry`], spaces catalog and per-thread activation
//! - [`config`] -- [`RegistryConfig`] and TOML [`SpacesConfig`] files
//! - [`error`] -- [`TablespaceError`]
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tspace_registry::{Backends, Registry, RegistryConfig, RegistrationOptions, TablespaceError};
//! use tspace_storage::InMemoryStorage;
//! use tspace_store::InMemoryVersionStore;
//! use tspace_types::Entity;
//!
//! let storage = Arc::new(InMemoryStorage::new());
//! storage.define_table("items", &["id"]).unwrap();
//! let registry = Registry::new(
//!     Backends::new(Arc::new(InMemoryVersionStore::new()), storage),
//!     RegistryConfig::default(),
//! );
//! let item = Entity::new("Item");
//! registry.register_entity(&item, "catalog", RegistrationOptions::new().with_history_depth(1));
//!
//! registry
//!     .activate("catalog", "staging", || {
//!         registry.stage_new_version(&item, || {
//!             assert_eq!(registry.table_name(&item)?, "catalog__staging__items__1");
//!             Ok::<_, TablespaceError>(())
//!         })
//!     })
//!     .unwrap();
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod options;
pub mod registry;
pub mod space;

pub use config::{ConfigError, EntityDecl, RegistryConfig, SpacesConfig};
pub use context::Context;
pub use error::{Result, TablespaceError};
pub use options::{RegistrationOptions, OPTION_KEYS};
pub use registry::Registry;
pub use space::{Backends, EntitySpace, Registration};
