//! The [`VersionStore`] trait defining the version persistence interface.
//!
//! A store keeps one record per `(namespace, instance_key, entity)` triple.
//! Version 0 is the implicit default and is never stored.

use std::collections::BTreeMap;

use tspace_types::{EntityKey, Version};

use crate::error::Result;

/// Versions of the entities of one namespace instantiation.
pub type VersionMap = BTreeMap<EntityKey, Version>;

/// Storage backend for version records.
///
/// Implementations must be thread-safe (`Send + Sync`). `write_versions`
/// must apply the whole map or nothing.
pub trait VersionStore: Send + Sync {
    /// List the instance keys with at least one stored record in `namespace`.
    ///
    /// Keys are returned sorted and without duplicates.
    fn list_instance_keys(&self, namespace: &str) -> Result<Vec<String>>;

    /// Read every stored version for one instantiation.
    ///
    /// Entities without a record are absent from the map (version 0).
    fn read_versions(&self, namespace: &str, instance_key: &str) -> Result<VersionMap>;

    /// Upsert the given versions for one instantiation.
    ///
    /// Entries at version 0 delete the record, changed versions are updated,
    /// and new non-zero versions are inserted. Entities not mentioned in
    /// `versions` are left untouched.
    fn write_versions(
        &self,
        namespace: &str,
        instance_key: &str,
        versions: &VersionMap,
    ) -> Result<()>;
}

/// What an upsert changed, for logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl UpsertSummary {
    /// Returns `true` if nothing changed.
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Apply the upsert rules of [`VersionStore::write_versions`] to `stored`.
pub fn apply_versions(stored: &mut VersionMap, updates: &VersionMap) -> UpsertSummary {
    let mut summary = UpsertSummary::default();
    for (entity, &version) in updates {
        match (stored.get(entity).copied(), version) {
            (Some(_), 0) => {
                stored.remove(entity);
                summary.deleted += 1;
            }
            (None, 0) => {}
            (Some(old), new) if old == new => {}
            (Some(_), new) => {
                stored.insert(entity.clone(), new);
                summary.updated += 1;
            }
            (None, new) => {
                stored.insert(entity.clone(), new);
                summary.inserted += 1;
            }
        }
    }
    summary
}
