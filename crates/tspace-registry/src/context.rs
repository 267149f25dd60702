//! Contexts: one live instantiation of an entity space.
//!
//! A [`Context`] tracks, per registered entity, the *current* version read
//! from the version store and the *working* version staged during its
//! lifetime. Physical names always come from the working version when one is
//! set, so code running inside a staging body sees the staged table while
//! readers of other contexts keep using the current one until commit.
//!
//! ```text
//!   idle ──stage──▶ staging ──body ok──▶ active working ──commit──▶ persisted
//!                      │
//!                      └──body err/panic──▶ idle (working version reverted)
//! ```

use std::sync::Arc;

use tracing::{debug, info};
use tspace_storage::StorageOps;
use tspace_store::{VersionMap, VersionStore};
use tspace_types::{naming, Entity, EntityKey, Version};

use crate::error::{Result, TablespaceError};
use crate::space::{EntitySpace, Registration};

/// Outcome of the first phase of staging.
///
/// `fresh` is set only when this call recorded the working version, so only
/// that call reverts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Staging {
    key: EntityKey,
    version: Version,
    fresh: bool,
}

/// Reverts a staging when dropped armed, i.e. when the body failed or panicked.
struct StagingRollback<'a> {
    context: &'a mut Context,
    staging: Option<Staging>,
}

impl Drop for StagingRollback<'_> {
    fn drop(&mut self) {
        if let Some(staging) = self.staging.take() {
            self.context.abort_staging(&staging);
        }
    }
}

/// Current and working versions of one `(namespace, instance_key)` pair.
#[derive(Debug)]
pub struct Context {
    space: Arc<EntitySpace>,
    instance_key: String,
    current: VersionMap,
    working: VersionMap,
}

impl Context {
    /// Load the current versions and make sure every registered entity's
    /// current table exists.
    pub fn new(space: Arc<EntitySpace>, instance_key: impl Into<String>) -> Result<Self> {
        let instance_key = instance_key.into();
        let current = space
            .backends()
            .versions
            .read_versions(space.name(), &instance_key)?;
        let context = Self {
            space,
            instance_key,
            current,
            working: VersionMap::new(),
        };

        for registration in context.space.registrations() {
            let version = context.current_of(&registration);
            let name = context.name_at(&registration, version)?;
            context
                .storage()
                .create_table(&registration.base_name(), &name)?;
        }

        debug!(
            namespace = %context.space.name(),
            instance_key = %context.instance_key,
            versions = context.current.len(),
            "context created"
        );
        Ok(context)
    }

    pub fn instance_key(&self) -> &str {
        &self.instance_key
    }

    pub fn entity_space(&self) -> &Arc<EntitySpace> {
        &self.space
    }

    /// Versions as loaded from the store (or reloaded after a hoover).
    pub fn current_versions(&self) -> &VersionMap {
        &self.current
    }

    /// Versions staged during this context's lifetime.
    pub fn working_versions(&self) -> &VersionMap {
        &self.working
    }

    fn storage(&self) -> &dyn StorageOps {
        self.space.backends().storage.as_ref()
    }

    fn versions(&self) -> &dyn VersionStore {
        self.space.backends().versions.as_ref()
    }

    fn current_of(&self, registration: &Registration) -> Version {
        let stored = self.current.get(&registration.key()).copied().unwrap_or(0);
        naming::normalize(registration.history_depth, stored)
    }

    fn name_at(&self, registration: &Registration, version: Version) -> Result<String> {
        self.space
            .physical_name(&self.instance_key, registration, version)
    }

    // ---------------------------------------------------------------
    // Names
    // ---------------------------------------------------------------

    /// The name all reads and writes should use: working if staged, else current.
    pub fn table_name(&self, entity: &Entity) -> Result<String> {
        let registration = self.space.registration(entity)?;
        let version = match self.working.get(&registration.key()) {
            Some(&version) => version,
            None => self.current_of(&registration),
        };
        self.name_at(&registration, version)
    }

    pub fn current_name(&self, entity: &Entity) -> Result<String> {
        let registration = self.space.registration(entity)?;
        self.name_at(&registration, self.current_of(&registration))
    }

    /// Name the next staging of `entity` would write to.
    pub fn next_name(&self, entity: &Entity) -> Result<String> {
        let registration = self.space.registration(entity)?;
        let next = naming::next_version(registration.history_depth, self.current_of(&registration));
        self.name_at(&registration, next)
    }

    pub fn working_name(&self, entity: &Entity) -> Result<Option<String>> {
        let registration = self.space.registration(entity)?;
        self.working
            .get(&registration.key())
            .map(|&version| self.name_at(&registration, version))
            .transpose()
    }

    /// Name of the version 0 table a hoover compacts into.
    pub fn hoovered_name(&self, entity: &Entity) -> Result<String> {
        let registration = self.space.registration(entity)?;
        self.name_at(&registration, 0)
    }

    pub fn current_version(&self, entity: &Entity) -> Result<Version> {
        let registration = self.space.registration(entity)?;
        Ok(self.current_of(&registration))
    }

    pub fn working_version(&self, entity: &Entity) -> Result<Option<Version>> {
        let registration = self.space.registration(entity)?;
        Ok(self.working.get(&registration.key()).copied())
    }

    // ---------------------------------------------------------------
    // Staging
    // ---------------------------------------------------------------

    /// Prepare the next version of `entity` and run `body` against it.
    ///
    /// Staging happens once per entity per context: a nested call for an
    /// entity that already has a working version only runs `body`. If
    /// preparation or `body` fails or panics, the working version is removed
    /// again so [`Context::table_name`] returns what it returned before the
    /// call.
    /// Physical tables created along the way are left in place.
    pub fn stage_new_version<T, E, F>(
        &mut self,
        entity: &Entity,
        copy_previous: bool,
        body: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
        E: From<TablespaceError>,
    {
        let staging = self.begin_staging(entity, copy_previous)?;
        let mut rollback = StagingRollback {
            context: self,
            staging: Some(staging),
        };
        let result = body(&mut *rollback.context);
        if result.is_ok() {
            rollback.staging = None;
        }
        result
    }

    /// Stage a new version seeded with the current version's rows.
    pub fn stage_updated_version<T, E, F>(
        &mut self,
        entity: &Entity,
        body: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
        E: From<TablespaceError>,
    {
        self.stage_new_version(entity, true, body)
    }

    pub(crate) fn begin_staging(&mut self, entity: &Entity, copy_previous: bool) -> Result<Staging> {
        let registration = self.space.registration(entity)?;
        let key = registration.key();
        if let Some(&version) = self.working.get(&key) {
            debug!(entity = %entity, version, "already staged");
            return Ok(Staging {
                key,
                version,
                fresh: false,
            });
        }

        let current = self.current_of(&registration);
        let next = naming::next_version(registration.history_depth, current);
        let current_name = self.name_at(&registration, current)?;

        if next == current {
            // No ring: the single table is rewritten in place.
            if !copy_previous {
                self.storage().truncate_table(&current_name)?;
            }
        } else {
            let next_name = self.name_at(&registration, next)?;
            self.storage()
                .recreate_table(&registration.base_name(), &next_name)?;
            if copy_previous {
                self.storage().copy_table(&current_name, &next_name)?;
            }
        }

        self.working.insert(key.clone(), next);
        debug!(
            namespace = %self.space.name(),
            instance_key = %self.instance_key,
            entity = %entity,
            current,
            version = next,
            copy_previous,
            "version staged"
        );
        Ok(Staging {
            key,
            version: next,
            fresh: true,
        })
    }

    pub(crate) fn abort_staging(&mut self, staging: &Staging) {
        if !staging.fresh {
            return;
        }
        self.working.remove(&staging.key);
        debug!(
            namespace = %self.space.name(),
            instance_key = %self.instance_key,
            entity = %staging.key,
            version = staging.version,
            "staging rolled back"
        );
    }

    // ---------------------------------------------------------------
    // Commit and compaction
    // ---------------------------------------------------------------

    /// Persist current versions overlaid with working versions.
    ///
    /// Only contexts created afterwards see the result; this context keeps
    /// its working versions.
    pub fn commit(&self) -> Result<()> {
        let mut merged = self.current.clone();
        merged.extend(self.working.iter().map(|(k, &v)| (k.clone(), v)));
        self.versions()
            .write_versions(self.space.name(), &self.instance_key, &merged)?;
        debug!(
            namespace = %self.space.name(),
            instance_key = %self.instance_key,
            staged = self.working.len(),
            "context committed"
        );
        Ok(())
    }

    /// Collapse every entity's history back onto its version 0 table.
    ///
    /// Refuses to run while anything is staged. Data in the current table is
    /// copied into the version 0 table when they differ, then every
    /// historical table is dropped and all versions are reset to 0.
    pub fn hoover(&mut self) -> Result<()> {
        if !self.working.is_empty() {
            return Err(TablespaceError::ActiveWorkingVersions {
                namespace: self.space.name().to_string(),
                instance_key: self.instance_key.clone(),
                entities: self.working.keys().map(|k| k.to_string()).collect(),
            });
        }

        let mut reset: VersionMap = self.current.keys().map(|k| (k.clone(), 0)).collect();
        for registration in self.space.registrations() {
            let current_name = self.name_at(&registration, self.current_of(&registration))?;
            let hoovered_name = self.name_at(&registration, 0)?;
            if current_name != hoovered_name {
                self.storage()
                    .recreate_table(&registration.base_name(), &hoovered_name)?;
                self.storage().copy_table(&current_name, &hoovered_name)?;
            }
            for version in 1..=registration.history_depth {
                let name = self.name_at(&registration, version)?;
                self.storage().drop_table(&name)?;
            }
            reset.insert(registration.key(), 0);
        }

        self.versions()
            .write_versions(self.space.name(), &self.instance_key, &reset)?;
        self.current = self
            .versions()
            .read_versions(self.space.name(), &self.instance_key)?;

        info!(
            namespace = %self.space.name(),
            instance_key = %self.instance_key,
            entities = reset.len(),
            "history hoovered"
        );
        Ok(())
    }
}
