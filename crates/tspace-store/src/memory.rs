//! In-memory version store for testing and ephemeral use.
//!
//! [`InMemoryVersionStore`] keeps all records in a `BTreeMap` protected by a
//! `RwLock`. Data is lost when the store is dropped.

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::traits::{apply_versions, VersionMap, VersionStore};

type InstanceId = (String, String);

/// An in-memory implementation of [`VersionStore`].
#[derive(Debug, Default)]
pub struct InMemoryVersionStore {
    records: RwLock<BTreeMap<InstanceId, VersionMap>>,
}

impl InMemoryVersionStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records across all instantiations.
    pub fn record_count(&self) -> Result<usize> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(records.values().map(BTreeMap::len).sum())
    }
}

impl VersionStore for InMemoryVersionStore {
    fn list_instance_keys(&self, namespace: &str) -> Result<Vec<String>> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        // BTreeMap ordering keeps keys sorted and unique per namespace.
        Ok(records
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, key)| key.clone())
            .collect())
    }

    fn read_versions(&self, namespace: &str, instance_key: &str) -> Result<VersionMap> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(records
            .get(&(namespace.to_string(), instance_key.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn write_versions(
        &self,
        namespace: &str,
        instance_key: &str,
        versions: &VersionMap,
    ) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;

        let id = (namespace.to_string(), instance_key.to_string());
        let stored = records.entry(id.clone()).or_default();
        let summary = apply_versions(stored, versions);
        if stored.is_empty() {
            records.remove(&id);
        }

        debug!(
            namespace,
            instance_key,
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            "versions written"
        );
        Ok(())
    }
}
