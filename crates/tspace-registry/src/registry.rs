//! The registry: catalog of entity spaces and per-thread activation stacks.
//!
//! Entity code asks the registry for table names without holding a context.
//! The registry resolves the entity's bound space, finds that space's active
//! context on the calling thread, and delegates to it.
//!
//! Activations nest. Each thread keeps its own stack of active contexts plus
//! a merged view (namespace -> context). Entering an activation pushes a
//! frame and extends the view; leaving it pops the frame and restores the
//! view exactly as it was, on success, failure, or panic.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};
use tspace_types::{Entity, EntityKey};

use crate::config::RegistryConfig;
use crate::context::{Context, Staging};
use crate::error::{Result, TablespaceError};
use crate::options::RegistrationOptions;
use crate::space::{Backends, EntitySpace};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ACTIVATIONS: RefCell<HashMap<u64, ThreadActivations>> = RefCell::new(HashMap::new());
}

/// One active context as seen from the merged view.
#[derive(Clone)]
struct Activation {
    namespace: String,
    instance_key: String,
    context: Rc<RefCell<Context>>,
}

struct Frame {
    activation: Activation,
    previous: HashMap<String, Activation>,
}

#[derive(Default)]
struct ThreadActivations {
    stack: Vec<Frame>,
    merged: HashMap<String, Activation>,
}

/// Pops the activation frame it was created for.
struct ActivationGuard {
    registry_id: u64,
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        let _ = ACTIVATIONS.try_with(|cell| {
            let Ok(mut all) = cell.try_borrow_mut() else {
                warn!(registry = self.registry_id, "activation stack busy, frame not popped");
                return;
            };
            let Some(state) = all.get_mut(&self.registry_id) else {
                return;
            };
            if let Some(frame) = state.stack.pop() {
                state.merged = frame.previous;
                debug!(
                    namespace = %frame.activation.namespace,
                    instance_key = %frame.activation.instance_key,
                    "context deactivated"
                );
            }
            if state.stack.is_empty() {
                all.remove(&self.registry_id);
            }
        });
    }
}

/// Aborts the staging it holds unless disarmed, so a body that errors or
/// unwinds leaves the working version as it found it.
struct StagingGuard {
    context: Rc<RefCell<Context>>,
    staging: Option<Staging>,
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        let Some(staging) = self.staging.take() else {
            return;
        };
        match self.context.try_borrow_mut() {
            Ok(mut context) => context.abort_staging(&staging),
            Err(_) => warn!(?staging, "context busy, staging not rolled back"),
        }
    }
}

#[derive(Default)]
struct Catalog {
    spaces: BTreeMap<String, Arc<EntitySpace>>,
    bindings: HashMap<EntityKey, String>,
}

/// Process-wide catalog of entity spaces and the ambient entry point for
/// entity code.
///
/// The catalog is shared between threads; activations are not. Every thread
/// activating a namespace gets its own context, so two threads may work on
/// the same namespace under different instance keys at once.
pub struct Registry {
    id: u64,
    backends: Backends,
    config: RegistryConfig,
    catalog: RwLock<Catalog>,
}

impl Registry {
    pub fn new(backends: Backends, config: RegistryConfig) -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            backends,
            config,
            catalog: RwLock::new(Catalog::default()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    fn read(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ---------------------------------------------------------------
    // Catalog
    // ---------------------------------------------------------------

    /// The space named `namespace`, created on first use.
    pub fn ensure_space(&self, namespace: &str) -> Arc<EntitySpace> {
        if let Some(space) = self.read().spaces.get(namespace) {
            return Arc::clone(space);
        }
        let mut catalog = self.write();
        let space = catalog
            .spaces
            .entry(namespace.to_string())
            .or_insert_with(|| {
                debug!(namespace, "entity space created");
                Arc::new(EntitySpace::new(namespace, self.backends.clone()))
            });
        Arc::clone(space)
    }

    pub fn entity_space(&self, namespace: &str) -> Result<Arc<EntitySpace>> {
        self.read()
            .spaces
            .get(namespace)
            .cloned()
            .ok_or_else(|| TablespaceError::UnknownNamespace {
                namespace: namespace.to_string(),
            })
    }

    /// Names of all spaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        self.read().spaces.keys().cloned().collect()
    }

    /// Bind `entity` to `namespace` and register it there.
    ///
    /// An entity bound elsewhere is first removed from its old space; the
    /// last registration wins.
    pub fn register_entity(
        &self,
        entity: &Entity,
        namespace: &str,
        options: RegistrationOptions,
    ) -> Arc<EntitySpace> {
        let key = entity.key();
        let previous = self.read().bindings.get(&key).cloned();
        if let Some(previous) = previous.filter(|ns| ns != namespace) {
            if let Some(old) = self.read().spaces.get(&previous) {
                old.deregister(entity);
            }
            debug!(entity = %entity, from = %previous, to = namespace, "entity rebound");
        }

        let space = self.ensure_space(namespace);
        space.register(entity, options);
        self.write().bindings.insert(key, namespace.to_string());
        space
    }

    /// Register from a dynamic option table.
    pub fn register_entity_with_table(
        &self,
        entity: &Entity,
        namespace: &str,
        options: &toml::Table,
    ) -> Result<Arc<EntitySpace>> {
        let options = RegistrationOptions::from_table(entity.name(), options)?;
        Ok(self.register_entity(entity, namespace, options))
    }

    /// Unbind `entity` and remove its exact registration.
    pub fn deregister_entity(&self, entity: &Entity) -> bool {
        let Some(namespace) = self.write().bindings.remove(&entity.key()) else {
            return false;
        };
        if let Some(space) = self.read().spaces.get(&namespace) {
            space.deregister(entity);
        }
        true
    }

    /// The space `entity` (or its nearest bound ancestor) is bound to.
    pub fn space_for(&self, entity: &Entity) -> Result<Arc<EntitySpace>> {
        let catalog = self.read();
        let space = entity
            .ancestors()
            .find_map(|e| catalog.bindings.get(&e.key()))
            .and_then(|ns| catalog.spaces.get(ns))
            .cloned();
        space.ok_or_else(|| TablespaceError::Unbound {
            entity: entity.name().to_string(),
        })
    }

    pub fn base_name(&self, entity: &Entity) -> Result<String> {
        self.space_for(entity)?.base_name(entity)
    }

    pub fn set_base_name(&self, entity: &Entity, base_name: impl Into<String>) -> Result<()> {
        self.space_for(entity)?.set_base_name(entity, base_name)
    }

    /// Instance keys with persisted versions in `namespace`.
    pub fn list_instance_keys(&self, namespace: &str) -> Result<Vec<String>> {
        let space = self.entity_space(namespace)?;
        Ok(space.backends().versions.list_instance_keys(space.name())?)
    }

    /// Destroy an instantiation that is not active on this thread.
    pub fn kill_context(&self, namespace: &str, instance_key: &str) -> Result<()> {
        let space = self.entity_space(namespace)?;
        if self.active_key(namespace)?.as_deref() == Some(instance_key) {
            return Err(TablespaceError::InstanceActive {
                namespace: namespace.to_string(),
                instance_key: instance_key.to_string(),
            });
        }
        space.kill_context(instance_key)
    }

    /// Forget every space and binding. Activations already running keep
    /// their contexts.
    pub fn reset(&self) {
        let mut catalog = self.write();
        catalog.spaces.clear();
        catalog.bindings.clear();
        info!("registry reset");
    }

    // ---------------------------------------------------------------
    // Activation
    // ---------------------------------------------------------------

    fn active(&self, namespace: &str) -> Option<Activation> {
        ACTIVATIONS.with(|cell| {
            cell.borrow()
                .get(&self.id)
                .and_then(|state| state.merged.get(namespace).cloned())
        })
    }

    fn push(&self, activation: Activation) -> ActivationGuard {
        ACTIVATIONS.with(|cell| {
            let mut all = cell.borrow_mut();
            let state = all.entry(self.id).or_default();
            let previous = state.merged.clone();
            state
                .merged
                .insert(activation.namespace.clone(), activation.clone());
            state.stack.push(Frame {
                activation,
                previous,
            });
        });
        ActivationGuard {
            registry_id: self.id,
        }
    }

    /// Instance key `namespace` is active with on this thread, if any.
    pub fn active_key(&self, namespace: &str) -> Result<Option<String>> {
        self.entity_space(namespace)?;
        Ok(self.active(namespace).map(|a| a.instance_key))
    }

    /// `(namespace, instance_key)` of this thread's activations, outermost first.
    pub fn active_stack(&self) -> Vec<(String, String)> {
        ACTIVATIONS.with(|cell| {
            cell.borrow()
                .get(&self.id)
                .map(|state| {
                    state
                        .stack
                        .iter()
                        .map(|f| (f.activation.namespace.clone(), f.activation.instance_key.clone()))
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    /// Run `body` with `namespace` active under `instance_key`.
    ///
    /// Re-activating the same pair just runs `body`; activating a different
    /// key for an active namespace fails. A fresh activation creates a
    /// context, runs `body`, and commits the context if `body` succeeded.
    pub fn activate<T, E, F>(&self, namespace: &str, instance_key: &str, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<TablespaceError>,
    {
        let space = self.entity_space(namespace)?;

        if let Some(active) = self.active(namespace) {
            if active.instance_key == instance_key {
                debug!(namespace, instance_key, "re-entering active context");
                return body();
            }
            return Err(TablespaceError::ConflictingActivation {
                namespace: namespace.to_string(),
                active_key: active.instance_key,
                requested_key: instance_key.to_string(),
            }
            .into());
        }

        let context = Rc::new(RefCell::new(space.create_context(instance_key)?));
        let _guard = self.push(Activation {
            namespace: namespace.to_string(),
            instance_key: instance_key.to_string(),
            context: Rc::clone(&context),
        });
        debug!(namespace, instance_key, "context activated");

        let value = body()?;
        context.borrow().commit()?;
        Ok(value)
    }

    // ---------------------------------------------------------------
    // Ambient operations
    // ---------------------------------------------------------------

    fn active_context(&self, entity: &Entity) -> Result<Rc<RefCell<Context>>> {
        let space = self.space_for(entity)?;
        self.active(space.name())
            .map(|a| a.context)
            .ok_or_else(|| TablespaceError::NoActiveContext {
                namespace: space.name().to_string(),
            })
    }

    fn resolve_name<F>(&self, entity: &Entity, name: F) -> Result<String>
    where
        F: FnOnce(&Context) -> Result<String>,
    {
        let space = self.space_for(entity)?;
        let Some(active) = self.active(space.name()) else {
            if self.config.enforce_context {
                return Err(TablespaceError::NoActiveContext {
                    namespace: space.name().to_string(),
                });
            }
            return space.base_name(entity);
        };
        let context = active.context.borrow();
        name(&context)
    }

    /// Name to read and write `entity` through right now.
    pub fn table_name(&self, entity: &Entity) -> Result<String> {
        self.resolve_name(entity, |ctx| ctx.table_name(entity))
    }

    pub fn current_table_name(&self, entity: &Entity) -> Result<String> {
        self.resolve_name(entity, |ctx| ctx.current_name(entity))
    }

    pub fn working_table_name(&self, entity: &Entity) -> Result<Option<String>> {
        let space = self.space_for(entity)?;
        let Some(active) = self.active(space.name()) else {
            if self.config.enforce_context {
                return Err(TablespaceError::NoActiveContext {
                    namespace: space.name().to_string(),
                });
            }
            return Ok(None);
        };
        let context = active.context.borrow();
        context.working_name(entity)
    }

    /// Stage a new, empty version of `entity` for the duration of `body`.
    pub fn stage_new_version<T, E, F>(&self, entity: &Entity, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<TablespaceError>,
    {
        self.stage(entity, false, body)
    }

    /// Stage a new version of `entity` seeded with its current rows.
    pub fn stage_updated_version<T, E, F>(&self, entity: &Entity, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<TablespaceError>,
    {
        self.stage(entity, true, body)
    }

    fn stage<T, E, F>(&self, entity: &Entity, copy_previous: bool, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<TablespaceError>,
    {
        let context = self.active_context(entity)?;
        let staging = context.borrow_mut().begin_staging(entity, copy_previous)?;
        let mut guard = StagingGuard {
            context,
            staging: Some(staging),
        };
        let result = body();
        if result.is_ok() {
            guard.staging = None;
        }
        result
    }

    /// Hoover the active context of `entity`'s space.
    pub fn hoover(&self, entity: &Entity) -> Result<()> {
        let context = self.active_context(entity)?;
        let mut context = context.borrow_mut();
        context.hoover()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let id = self.id;
        let _ = ACTIVATIONS.try_with(|cell| {
            match cell.try_borrow_mut() {
                Ok(mut all) => {
                    all.remove(&id);
                }
                Err(_) => warn!(registry = id, "activation stack busy, entry left behind"),
            }
        });
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("namespaces", &self.namespaces())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tspace_storage::InMemoryStorage;
    use tspace_store::InMemoryVersionStore;

    fn registry(config: RegistryConfig) -> Registry {
        let storage = Arc::new(InMemoryStorage::new());
        for table in ["items", "users"] {
            storage.define_table(table, &["id"]).unwrap();
        }
        let backends = Backends::new(Arc::new(InMemoryVersionStore::new()), storage);
        let registry = Registry::new(backends, config);
        registry.register_entity(
            &Entity::new("Item"),
            "foo",
            RegistrationOptions::new().with_history_depth(2),
        );
        registry.register_entity(&Entity::new("User"), "bar", RegistrationOptions::new());
        registry
    }

    #[test]
    fn registry_is_shareable_between_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Registry>();
    }

    #[test]
    fn register_entity_creates_and_binds_spaces() {
        let r = registry(RegistryConfig::default());
        assert_eq!(r.namespaces(), vec!["bar", "foo"]);
        assert_eq!(r.space_for(&Entity::new("Item")).unwrap().name(), "foo");
        assert_eq!(r.base_name(&Entity::new("Item")).unwrap(), "items");
    }

    #[test]
    fn reregistering_moves_entity_between_spaces() {
        let r = registry(RegistryConfig::default());
        let item = Entity::new("Item");
        r.register_entity(&item, "bar", RegistrationOptions::new());

        assert_eq!(r.space_for(&item).unwrap().name(), "bar");
        assert!(!r.entity_space("foo").unwrap().is_registered(&item));
        assert_eq!(r.entity_space("bar").unwrap().history_depth(&item).unwrap(), 0);
    }

    #[test]
    fn unbound_entities_fail() {
        let r = registry(RegistryConfig::default());
        let ghost = Entity::new("Ghost");
        assert!(matches!(r.space_for(&ghost), Err(TablespaceError::Unbound { .. })));
        assert!(matches!(r.table_name(&ghost), Err(TablespaceError::Unbound { .. })));
        assert!(r.set_base_name(&ghost, "x").is_err());
    }

    #[test]
    fn child_resolves_through_parent_binding() {
        let r = registry(RegistryConfig::default());
        let special = Entity::with_parent("SpecialItem", &Entity::new("Item"));
        assert_eq!(r.space_for(&special).unwrap().name(), "foo");
        assert_eq!(r.base_name(&special).unwrap(), "items");
    }

    #[test]
    fn deregister_entity_unbinds() {
        let r = registry(RegistryConfig::default());
        let user = Entity::new("User");
        assert!(r.deregister_entity(&user));
        assert!(!r.deregister_entity(&user));
        assert!(r.space_for(&user).is_err());
        assert!(r.entity_space("bar").unwrap().registered_keys().is_empty());
    }

    #[test]
    fn unknown_namespace_fails_activation() {
        let r = registry(RegistryConfig::default());
        let err = r.activate("nope", "one", || Ok::<_, TablespaceError>(())).unwrap_err();
        assert!(
            matches!(err, TablespaceError::UnknownNamespace { ref namespace } if namespace == "nope"),
            "expected UnknownNamespace, got: {err}"
        );
        assert!(r.active_key("nope").is_err());
    }

    #[test]
    fn table_name_requires_active_context() {
        let r = registry(RegistryConfig::default());
        let err = r.table_name(&Entity::new("Item")).unwrap_err();
        assert!(
            matches!(err, TablespaceError::NoActiveContext { ref namespace } if namespace == "foo"),
            "expected NoActiveContext, got: {err}"
        );
    }

    #[test]
    fn activation_is_visible_only_inside_body() {
        let r = registry(RegistryConfig::default());
        let item = Entity::new("Item");

        let name = r
            .activate("foo", "one", || {
                assert_eq!(r.active_key("foo")?, Some("one".to_string()));
                r.table_name(&item)
            })
            .unwrap();

        assert_eq!(name, "foo__one__items");
        assert_eq!(r.active_key("foo").unwrap(), None);
        assert!(r.active_stack().is_empty());
    }

    #[test]
    fn nested_activations_of_different_namespaces() {
        let r = registry(RegistryConfig::default());

        r.activate("foo", "one", || {
            r.activate("bar", "two", || {
                assert_eq!(
                    r.active_stack(),
                    vec![("foo".to_string(), "one".to_string()), ("bar".to_string(), "two".to_string())]
                );
                assert_eq!(r.table_name(&Entity::new("User"))?, "bar__two__users");
                assert_eq!(r.table_name(&Entity::new("Item"))?, "foo__one__items");
                Ok::<_, TablespaceError>(())
            })?;
            assert_eq!(r.active_key("bar")?, None);
            assert_eq!(r.active_key("foo")?, Some("one".to_string()));
            Ok::<_, TablespaceError>(())
        })
        .unwrap();
    }

    #[test]
    fn separate_registries_do_not_share_activations() {
        let a = registry(RegistryConfig::default());
        let b = registry(RegistryConfig::default());

        a.activate("foo", "one", || {
            assert_eq!(b.active_key("foo")?, None);
            b.activate("foo", "two", || Ok::<_, TablespaceError>(()))
        })
        .unwrap();
    }

    #[test]
    fn kill_context_refuses_active_instance() {
        let r = registry(RegistryConfig::default());
        let err = r
            .activate("foo", "one", || r.kill_context("foo", "one"))
            .unwrap_err();
        assert!(matches!(err, TablespaceError::InstanceActive { .. }), "got: {err}");

        r.activate("foo", "one", || r.kill_context("foo", "two")).unwrap();
        r.kill_context("foo", "one").unwrap();
    }

    #[test]
    fn reset_forgets_everything() {
        let r = registry(RegistryConfig::default());
        r.reset();
        assert!(r.namespaces().is_empty());
        assert!(r.space_for(&Entity::new("Item")).is_err());
    }

    #[test]
    fn unenforced_mode_falls_back_to_base_names() {
        let r = registry(RegistryConfig {
            enforce_context: false,
        });
        let item = Entity::new("Item");

        assert_eq!(r.table_name(&item).unwrap(), "items");
        assert_eq!(r.current_table_name(&item).unwrap(), "items");
        assert_eq!(r.working_table_name(&item).unwrap(), None);
        assert!(matches!(
            r.stage_new_version(&item, || Ok::<_, TablespaceError>(())),
            Err(TablespaceError::NoActiveContext { .. })
        ));
        assert!(matches!(r.hoover(&item), Err(TablespaceError::NoActiveContext { .. })));
    }
}
