//! Entity spaces: named groups of entities sharing a versioning policy.
//!
//! An [`EntitySpace`] owns the registrations of one namespace. Lookups walk
//! an entity's parent chain and use the first registered ancestor, so a
//! derived entity shares its parent's table unless registered itself.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};
use tspace_storage::StorageOps;
use tspace_store::{VersionMap, VersionStore};
use tspace_types::{naming, Entity, EntityKey, Version};

use crate::context::Context;
use crate::error::{Result, TablespaceError};
use crate::options::RegistrationOptions;

/// The persistence and physical backends a space works against.
#[derive(Clone)]
pub struct Backends {
    pub versions: Arc<dyn VersionStore>,
    pub storage: Arc<dyn StorageOps>,
}

impl Backends {
    pub fn new(versions: Arc<dyn VersionStore>, storage: Arc<dyn StorageOps>) -> Self {
        Self { versions, storage }
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

/// An entity's registration in a space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub entity: Entity,
    pub history_depth: u32,
    pub base_name: Option<String>,
}

impl Registration {
    /// Key the registered entity's versions are stored under.
    pub fn key(&self) -> EntityKey {
        self.entity.key()
    }

    /// The override if set, otherwise the name derived from the entity.
    pub fn base_name(&self) -> String {
        self.base_name
            .clone()
            .unwrap_or_else(|| self.entity.default_base_name())
    }
}

/// A named set of entity registrations bound to its backends.
pub struct EntitySpace {
    name: String,
    registrations: RwLock<BTreeMap<EntityKey, Registration>>,
    backends: Backends,
}

impl EntitySpace {
    pub fn new(name: impl Into<String>, backends: Backends) -> Self {
        Self {
            name: name.into(),
            registrations: RwLock::new(BTreeMap::new()),
            backends,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    // Each write is a single insert/remove, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<EntityKey, Registration>> {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<EntityKey, Registration>> {
        self.registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ---------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------

    /// Install or overwrite the registration for `entity` itself.
    pub fn register(&self, entity: &Entity, options: RegistrationOptions) -> &Self {
        debug!(
            namespace = %self.name,
            entity = %entity,
            history_depth = options.history_depth,
            "entity registered"
        );
        self.write().insert(
            entity.key(),
            Registration {
                entity: entity.clone(),
                history_depth: options.history_depth,
                base_name: options.base_name,
            },
        );
        self
    }

    /// Register from a dynamic option table, rejecting unknown keys.
    pub fn register_with_table(&self, entity: &Entity, options: &toml::Table) -> Result<&Self> {
        let options = RegistrationOptions::from_table(entity.name(), options)?;
        Ok(self.register(entity, options))
    }

    /// Remove the exact registration of `entity`. Ancestors are untouched.
    pub fn deregister(&self, entity: &Entity) -> bool {
        self.write().remove(&entity.key()).is_some()
    }

    fn lookup(&self, entity: &Entity) -> Option<Registration> {
        let registrations = self.read();
        entity
            .ancestors()
            .find_map(|e| registrations.get(&e.key()).cloned())
    }

    /// The registration `entity` resolves to through its ancestor chain.
    pub fn registration(&self, entity: &Entity) -> Result<Registration> {
        self.lookup(entity)
            .ok_or_else(|| TablespaceError::NotRegistered {
                entity: entity.name().to_string(),
                namespace: self.name.clone(),
            })
    }

    pub fn is_registered(&self, entity: &Entity) -> bool {
        self.lookup(entity).is_some()
    }

    pub fn registered_entity(&self, entity: &Entity) -> Result<Entity> {
        Ok(self.registration(entity)?.entity)
    }

    pub fn history_depth(&self, entity: &Entity) -> Result<u32> {
        Ok(self.registration(entity)?.history_depth)
    }

    pub fn base_name(&self, entity: &Entity) -> Result<String> {
        Ok(self.registration(entity)?.base_name())
    }

    /// Override the base name of the registration `entity` resolves to.
    pub fn set_base_name(&self, entity: &Entity, base_name: impl Into<String>) -> Result<()> {
        let key = self.registration(entity)?.key();
        if let Some(registration) = self.write().get_mut(&key) {
            registration.base_name = Some(base_name.into());
        }
        Ok(())
    }

    /// Keys of all exact registrations, sorted.
    pub fn registered_keys(&self) -> Vec<EntityKey> {
        self.read().keys().cloned().collect()
    }

    /// Snapshot of all registrations, sorted by key.
    pub fn registrations(&self) -> Vec<Registration> {
        self.read().values().cloned().collect()
    }

    // ---------------------------------------------------------------
    // Naming
    // ---------------------------------------------------------------

    /// Physical name of `registration` at `version` for one instantiation.
    pub fn physical_name(
        &self,
        instance_key: &str,
        registration: &Registration,
        version: Version,
    ) -> Result<String> {
        Ok(naming::table_name(
            &self.name,
            instance_key,
            &registration.base_name(),
            registration.history_depth,
            version,
        )?)
    }

    // ---------------------------------------------------------------
    // Instantiation
    // ---------------------------------------------------------------

    /// Start a context for `instance_key`, materialising its current tables.
    pub fn create_context(self: &Arc<Self>, instance_key: impl Into<String>) -> Result<Context> {
        Context::new(Arc::clone(self), instance_key)
    }

    /// Destroy an instantiation: drop every version of every table and
    /// forget its persisted versions.
    pub fn kill_context(&self, instance_key: &str) -> Result<()> {
        let mut reset = VersionMap::new();
        for registration in self.registrations() {
            for version in 0..=registration.history_depth {
                let name = self.physical_name(instance_key, &registration, version)?;
                self.backends.storage.drop_table(&name)?;
            }
            reset.insert(registration.key(), 0);
        }

        // Records of entities that were since deregistered go too.
        for key in self.backends.versions.read_versions(&self.name, instance_key)?.into_keys() {
            reset.insert(key, 0);
        }
        self.backends
            .versions
            .write_versions(&self.name, instance_key, &reset)?;

        info!(namespace = %self.name, instance_key, "instantiation destroyed");
        Ok(())
    }
}

impl fmt::Debug for EntitySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySpace")
            .field("name", &self.name)
            .field("registrations", &self.registered_keys())
            .finish()
    }
}
