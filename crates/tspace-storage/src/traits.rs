//! The [`StorageOps`] trait defining the physical table interface.
//!
//! Tables are addressed purely by name. Every backend (in-memory, SQL)
//! implements this trait; the versioning engine never talks to a backend
//! any other way.

use crate::error::Result;

/// Physical table operations.
pub trait StorageOps: Send + Sync {
    /// Create `target_name` with the schema of `base_name`.
    ///
    /// A no-op if the names are equal or `target_name` already exists.
    fn create_table(&self, base_name: &str, target_name: &str) -> Result<()>;

    /// Drop `target_name`. A no-op if it does not exist.
    fn drop_table(&self, target_name: &str) -> Result<()>;

    /// Remove every row of `target_name`, keeping its schema.
    fn truncate_table(&self, target_name: &str) -> Result<()>;

    /// Append every row of `from_name` to `to_name`. A no-op if equal.
    fn copy_table(&self, from_name: &str, to_name: &str) -> Result<()>;

    /// Drop `target_name` and create it afresh from `base_name`.
    ///
    /// Does nothing if the names are equal: the base table is never dropped.
    fn recreate_table(&self, base_name: &str, target_name: &str) -> Result<()> {
        if base_name == target_name {
            return Ok(());
        }
        self.drop_table(target_name)?;
        self.create_table(base_name, target_name)
    }
}
