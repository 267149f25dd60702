//! End-to-end activation, staging, and hoover scenarios against the
//! in-memory backends.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use serde_json::json;
use tspace_registry::{
    Backends, Registry, RegistryConfig, RegistrationOptions, SpacesConfig, TablespaceError,
};
use tspace_storage::{InMemoryStorage, StorageOp};
use tspace_store::{FileVersionStore, InMemoryVersionStore, VersionMap, VersionStore};
use tspace_types::{Entity, EntityKey};

struct Harness {
    registry: Registry,
    versions: Arc<dyn VersionStore>,
    storage: Arc<InMemoryStorage>,
}

fn harness_with(versions: Arc<dyn VersionStore>, config: RegistryConfig) -> Harness {
    let storage = Arc::new(InMemoryStorage::new());
    for table in ["as", "bs", "cs", "items", "others"] {
        storage.define_table(table, &["id", "name"]).unwrap();
    }
    let registry = Registry::new(Backends::new(versions.clone(), storage.clone()), config);
    registry.register_entity(
        &Entity::new("Item"),
        "foo",
        RegistrationOptions::new().with_history_depth(2),
    );
    registry.register_entity(&Entity::new("Other"), "foo", RegistrationOptions::new());
    Harness {
        registry,
        versions,
        storage,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(InMemoryVersionStore::new()), RegistryConfig::default())
}

fn item() -> Entity {
    Entity::new("Item")
}

fn other() -> Entity {
    Entity::new("Other")
}

fn versions(pairs: &[(&str, u32)]) -> VersionMap {
    pairs.iter().map(|(k, v)| (EntityKey::from(*k), *v)).collect()
}

#[test]
fn conflicting_activation_is_rejected() {
    let h = harness();
    let r = &h.registry;

    let err = r
        .activate("foo", "one", || r.activate("foo", "two", || Ok::<_, TablespaceError>(())))
        .unwrap_err();

    match err {
        TablespaceError::ConflictingActivation {
            namespace,
            active_key,
            requested_key,
        } => {
            assert_eq!(namespace, "foo");
            assert_eq!(active_key, "one");
            assert_eq!(requested_key, "two");
        }
        other => panic!("expected ConflictingActivation, got: {other}"),
    }
    assert_eq!(r.active_key("foo").unwrap(), None);
}

#[test]
fn reentrant_activation_reuses_the_context() {
    let h = harness();
    let r = &h.registry;

    let value = r
        .activate("foo", "one", || {
            r.stage_new_version(&item(), || Ok::<_, TablespaceError>(()))?;
            r.activate("foo", "one", || {
                assert_eq!(r.active_stack().len(), 1);
                // the staged version is visible, so this is the same context
                r.table_name(&item())
            })
        })
        .unwrap();

    assert_eq!(value, "foo__one__items__1");
}

#[test]
fn successful_activation_commits() {
    let h = harness();
    let r = &h.registry;

    r.activate("foo", "one", || {
        r.stage_updated_version(&item(), || Ok::<_, TablespaceError>(()))
    })
    .unwrap();

    assert_eq!(h.versions.read_versions("foo", "one").unwrap(), versions(&[("Item", 1)]));
    let name = r.activate("foo", "one", || r.table_name(&item())).unwrap();
    assert_eq!(name, "foo__one__items__1");
    assert_eq!(r.list_instance_keys("foo").unwrap(), vec!["one"]);
}

#[test]
fn failed_activation_does_not_commit() {
    let h = harness();
    let r = &h.registry;

    let err = r
        .activate("foo", "one", || {
            r.stage_new_version(&item(), || Ok::<_, TablespaceError>(()))?;
            Err::<(), _>(TablespaceError::NoActiveContext {
                namespace: "elsewhere".into(),
            })
        })
        .unwrap_err();

    assert!(matches!(err, TablespaceError::NoActiveContext { .. }));
    assert!(h.versions.read_versions("foo", "one").unwrap().is_empty());
}

#[test]
fn rollback_restores_table_name() {
    let h = harness();
    let r = &h.registry;

    r.activate("foo", "one", || {
        let before = r.table_name(&item())?;
        let result = r.stage_new_version(&item(), || {
            assert_eq!(r.table_name(&item())?, "foo__one__items__1");
            assert_eq!(r.working_table_name(&item())?.as_deref(), Some("foo__one__items__1"));
            Err::<(), _>(TablespaceError::InvalidOption {
                entity: "Item".into(),
                key: "x".into(),
                reason: "boom".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(r.table_name(&item())?, before);
        assert_eq!(r.working_table_name(&item())?, None);
        Ok::<_, TablespaceError>(())
    })
    .unwrap();
}

#[test]
fn staging_is_idempotent_within_a_context() {
    let h = harness();
    let r = &h.registry;

    r.activate("foo", "one", || {
        h.storage.clear_journal();
        r.stage_new_version(&item(), || Ok::<_, TablespaceError>(()))?;
        r.stage_updated_version(&item(), || Ok::<_, TablespaceError>(()))?;
        assert_eq!(r.table_name(&item())?, "foo__one__items__1");
        Ok::<_, TablespaceError>(())
    })
    .unwrap();

    assert_eq!(
        h.storage.journal(),
        vec![StorageOp::Recreate { base: "items".into(), target: "foo__one__items__1".into() }]
    );
}

#[test]
fn staging_from_version_one_without_and_with_copy() {
    let h = harness();
    h.versions
        .write_versions("foo", "one", &versions(&[("Item", 1)]))
        .unwrap();
    let r = &h.registry;

    r.activate("foo", "one", || {
        h.storage.clear_journal();
        r.stage_new_version(&item(), || Ok::<_, TablespaceError>(()))?;
        assert!(r.table_name(&item())?.ends_with("__2"));
        Ok::<_, TablespaceError>(())
    })
    .unwrap();
    assert_eq!(
        h.storage.journal(),
        vec![StorageOp::Recreate { base: "items".into(), target: "foo__one__items__2".into() }]
    );

    h.versions
        .write_versions("foo", "one", &versions(&[("Item", 1)]))
        .unwrap();
    r.activate("foo", "one", || {
        h.storage.clear_journal();
        r.stage_updated_version(&item(), || Ok::<_, TablespaceError>(()))
    })
    .unwrap();
    assert_eq!(
        h.storage.journal(),
        vec![
            StorageOp::Recreate { base: "items".into(), target: "foo__one__items__2".into() },
            StorageOp::Copy { from: "foo__one__items__1".into(), to: "foo__one__items__2".into() },
        ]
    );
}

#[test]
fn staging_without_history_truncates() {
    let h = harness();
    let r = &h.registry;

    r.activate("foo", "one", || {
        h.storage.clear_journal();
        r.stage_new_version(&other(), || Ok::<_, TablespaceError>(()))?;
        assert_eq!(r.table_name(&other())?, "foo__one__others");
        Ok::<_, TablespaceError>(())
    })
    .unwrap();

    assert_eq!(
        h.storage.journal(),
        vec![StorageOp::Truncate { target: "foo__one__others".into() }]
    );
    assert!(h.versions.read_versions("foo", "one").unwrap().is_empty());
}

#[test]
fn hoover_compacts_every_entity() {
    let h = harness();
    let r = &h.registry;
    for (name, depth) in [("A", 2), ("B", 1), ("C", 0)] {
        r.register_entity(
            &Entity::new(name),
            "bar",
            RegistrationOptions::new().with_history_depth(depth),
        );
    }
    h.versions
        .write_versions("bar", "one", &versions(&[("A", 1), ("B", 1)]))
        .unwrap();

    r.activate("bar", "one", || {
        h.storage
            .insert_rows("bar__one__as__1", vec![vec![json!(1), json!("a")]])
            .unwrap();
        h.storage
            .insert_rows("bar__one__bs__1", vec![vec![json!(2), json!("b")]])
            .unwrap();
        h.storage.clear_journal();

        r.hoover(&Entity::new("C"))?;

        for name in ["A", "B", "C"] {
            let table = r.table_name(&Entity::new(name))?;
            assert_eq!(table, format!("bar__one__{}s", name.to_lowercase()));
        }
        Ok::<_, TablespaceError>(())
    })
    .unwrap();

    assert_eq!(
        h.storage.journal(),
        vec![
            StorageOp::Recreate { base: "as".into(), target: "bar__one__as".into() },
            StorageOp::Copy { from: "bar__one__as__1".into(), to: "bar__one__as".into() },
            StorageOp::Drop { target: "bar__one__as__1".into() },
            StorageOp::Drop { target: "bar__one__as__2".into() },
            StorageOp::Recreate { base: "bs".into(), target: "bar__one__bs".into() },
            StorageOp::Copy { from: "bar__one__bs__1".into(), to: "bar__one__bs".into() },
            StorageOp::Drop { target: "bar__one__bs__1".into() },
        ]
    );
    assert_eq!(h.storage.rows("bar__one__as").unwrap().len(), 1);
    assert_eq!(h.storage.rows("bar__one__bs").unwrap().len(), 1);
    assert!(!h.storage.exists("bar__one__as__1").unwrap());
    assert!(h.versions.read_versions("bar", "one").unwrap().is_empty());
}

#[test]
fn hoover_with_staged_versions_does_nothing() {
    let h = harness();
    let r = &h.registry;

    let err = r
        .activate("foo", "one", || {
            r.stage_new_version(&item(), || {
                h.storage.clear_journal();
                r.hoover(&item())
            })
        })
        .unwrap_err();

    assert!(
        matches!(err, TablespaceError::ActiveWorkingVersions { .. }),
        "expected ActiveWorkingVersions, got: {err}"
    );
    assert!(h.storage.journal().is_empty());
}

#[test]
fn panicking_body_still_deactivates() {
    let h = harness();
    let r = &h.registry;

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        r.activate("foo", "one", || -> Result<(), TablespaceError> { panic!("body exploded") })
    }));

    assert!(outcome.is_err());
    assert_eq!(r.active_key("foo").unwrap(), None);
    r.activate("foo", "two", || Ok::<_, TablespaceError>(())).unwrap();
}

#[test]
fn panicking_staging_body_rolls_back() {
    let h = harness();
    let r = &h.registry;

    r.activate("foo", "one", || {
        let before = r.table_name(&item())?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            r.stage_new_version(&item(), || -> Result<(), TablespaceError> { panic!("boom") })
        }));

        assert!(outcome.is_err());
        assert_eq!(r.table_name(&item())?, before);
        assert_eq!(r.working_table_name(&item())?, None);

        // The next staging starts from scratch.
        r.stage_new_version(&item(), || {
            assert_eq!(r.table_name(&item())?, "foo__one__items__1");
            Ok::<_, TablespaceError>(())
        })
    })
    .unwrap();

    assert_eq!(
        h.versions.read_versions("foo", "one").unwrap(),
        versions(&[("Item", 1)])
    );
}

#[test]
fn panicking_staging_body_commits_nothing() {
    let h = harness();
    let r = &h.registry;

    r.activate("foo", "one", || {
        let _ = panic::catch_unwind(AssertUnwindSafe(|| {
            r.stage_updated_version(&item(), || -> Result<(), TablespaceError> { panic!("boom") })
        }));
        Ok::<_, TablespaceError>(())
    })
    .unwrap();

    assert!(h.versions.read_versions("foo", "one").unwrap().is_empty());
    assert!(h.versions.list_instance_keys("foo").unwrap().is_empty());
}

#[test]
fn threads_activate_the_same_namespace_independently() {
    let h = harness();
    let registry = Arc::new(h.registry);

    let handles: Vec<_> = ["one", "two"]
        .into_iter()
        .map(|key| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                registry
                    .activate("foo", key, || {
                        assert_eq!(registry.active_key("foo")?, Some(key.to_string()));
                        registry.stage_new_version(&item(), || registry.table_name(&item()))
                    })
                    .unwrap()
            })
        })
        .collect();

    let names: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(names, vec!["foo__one__items__1", "foo__two__items__1"]);
    assert_eq!(registry.active_key("foo").unwrap(), None);
    assert_eq!(registry.list_instance_keys("foo").unwrap(), vec!["one", "two"]);
}

#[test]
fn unenforced_registry_resolves_outside_activation() {
    let h = harness_with(
        Arc::new(InMemoryVersionStore::new()),
        RegistryConfig {
            enforce_context: false,
        },
    );
    let r = &h.registry;

    assert_eq!(r.table_name(&item()).unwrap(), "items");
    let inside = r.activate("foo", "one", || r.table_name(&item())).unwrap();
    assert_eq!(inside, "foo__one__items");
}

#[test]
fn versions_survive_in_a_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("versions.json");

    {
        let h = harness_with(Arc::new(FileVersionStore::open(&path)), RegistryConfig::default());
        let r = &h.registry;
        r.activate("foo", "one", || {
            r.stage_new_version(&item(), || Ok::<_, TablespaceError>(()))
        })
        .unwrap();
    }

    let h = harness_with(Arc::new(FileVersionStore::open(&path)), RegistryConfig::default());
    let r = &h.registry;
    let name = r.activate("foo", "one", || r.current_table_name(&item())).unwrap();
    assert_eq!(name, "foo__one__items__1");
}

#[test]
fn configured_spaces_drive_activation() {
    let config = SpacesConfig::from_toml_str(
        r#"
[entities]
Item = {}
SpecialItem = { parent = "Item" }

[spaces.catalog]
Item = { history_depth = 1 }
"#,
    )
    .unwrap();
    let h = harness();
    let entities = config.apply(&h.registry).unwrap();
    let r = &h.registry;
    let special = &entities["SpecialItem"];

    let name = r
        .activate("catalog", "live", || {
            r.stage_updated_version(special, || r.table_name(&entities["Item"]))
        })
        .unwrap();

    assert_eq!(name, "catalog__live__items__1");
    assert_eq!(
        h.versions.read_versions("catalog", "live").unwrap(),
        versions(&[("Item", 1)])
    );
}

#[test]
fn kill_context_retires_an_instance() {
    let h = harness();
    let r = &h.registry;
    r.activate("foo", "one", || {
        r.stage_new_version(&item(), || Ok::<_, TablespaceError>(()))
    })
    .unwrap();
    assert!(h.storage.exists("foo__one__items__1").unwrap());

    r.kill_context("foo", "one").unwrap();

    assert!(!h.storage.exists("foo__one__items").unwrap());
    assert!(!h.storage.exists("foo__one__items__1").unwrap());
    assert!(r.list_instance_keys("foo").unwrap().is_empty());
}
