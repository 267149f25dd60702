//! Physical table operations for table spaces.
//!
//! The versioning engine only ever asks for five things: create a table from
//! a base table's schema, drop it, recreate it, truncate it, and bulk-copy
//! rows between two tables. Those are the [`StorageOps`] trait.
//!
//! # Backends
//!
//! - [`InMemoryStorage`] -- tables in a `BTreeMap`, with an operation journal
//! - [`SqlStorage`] -- SQL text through a [`SqlExecutor`], schema cloning via
//!   a configured [`SchemaCopier`]

pub mod error;
pub mod memory;
pub mod sql;
pub mod traits;

pub use error::{Result, StorageError};
pub use memory::{InMemoryStorage, Row, StorageOp};
pub use sql::{SchemaCopier, SqlExecutor, SqlStorage};
pub use traits::StorageOps;
