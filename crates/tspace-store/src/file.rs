//! File-backed version store.
//!
//! [`FileVersionStore`] keeps every record in a single JSON document:
//!
//! ```text
//! {
//!   "namespaces": {
//!     "catalog": { "staging": { "Item": 2, "User": 1 } }
//!   }
//! }
//! ```
//!
//! Each write loads the document, applies the upsert, and replaces the file
//! through a temporary sibling that is renamed into place, so a write either
//! lands completely or not at all.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::traits::{apply_versions, VersionMap, VersionStore};

#[derive(Debug, Default, Serialize, Deserialize)]
struct VersionDocument {
    #[serde(default)]
    namespaces: BTreeMap<String, BTreeMap<String, VersionMap>>,
}

/// A [`VersionStore`] persisted as a JSON file.
#[derive(Debug)]
pub struct FileVersionStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileVersionStore {
    /// Open a store at `path`. The file is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every namespace with at least one stored record.
    pub fn namespaces(&self) -> Result<Vec<String>> {
        Ok(self.load()?.namespaces.into_keys().collect())
    }

    fn load(&self) -> Result<VersionDocument> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(VersionDocument::default()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(VersionDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, document: &VersionDocument) -> Result<()> {
        let json = serde_json::to_vec_pretty(document)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

impl VersionStore for FileVersionStore {
    fn list_instance_keys(&self, namespace: &str) -> Result<Vec<String>> {
        let document = self.load()?;
        Ok(document
            .namespaces
            .get(namespace)
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn read_versions(&self, namespace: &str, instance_key: &str) -> Result<VersionMap> {
        let document = self.load()?;
        Ok(document
            .namespaces
            .get(namespace)
            .and_then(|keys| keys.get(instance_key))
            .cloned()
            .unwrap_or_default())
    }

    fn write_versions(
        &self,
        namespace: &str,
        instance_key: &str,
        versions: &VersionMap,
    ) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;

        let mut document = self.load()?;
        let keys = document.namespaces.entry(namespace.to_string()).or_default();
        let stored = keys.entry(instance_key.to_string()).or_default();
        let summary = apply_versions(stored, versions);

        if summary.is_noop() {
            return Ok(());
        }
        if stored.is_empty() {
            keys.remove(instance_key);
        }
        if keys.is_empty() {
            document.namespaces.remove(namespace);
        }

        self.save(&document)?;
        debug!(
            path = %self.path.display(),
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
