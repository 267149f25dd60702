//! Entity descriptors and the keys versions are persisted under.
//!
//! An [`Entity`] names a logical record type whose rows live in a physical
//! table. Entities may form a hierarchy through an explicit parent link: a
//! child entity with no registration of its own shares the versioning policy
//! and physical table of its nearest registered ancestor.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::naming;

/// Key under which an entity's version is recorded.
///
/// This is the entity name verbatim (e.g. `"Item"`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// Create a key from a raw entity name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct EntityInner {
    name: String,
    parent: Option<Entity>,
}

/// Descriptor of a logical entity with an optional parent link.
///
/// Cloning is cheap (reference counted). Two descriptors are equal when they
/// have the same name and equal parent chains.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Entity {
    inner: Arc<EntityInner>,
}

impl Entity {
    /// A root entity (no parent).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EntityInner {
                name: name.into(),
                parent: None,
            }),
        }
    }

    /// An entity deriving from `parent`.
    pub fn with_parent(name: impl Into<String>, parent: &Entity) -> Self {
        Self {
            inner: Arc::new(EntityInner {
                name: name.into(),
                parent: Some(parent.clone()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<&Entity> {
        self.inner.parent.as_ref()
    }

    /// The key this entity's own registration and versions are stored under.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.inner.name.clone())
    }

    /// Default physical table name derived from the entity name.
    pub fn default_base_name(&self) -> String {
        naming::base_name(&self.inner.name)
    }

    /// Walk the hierarchy from this entity (inclusive) up to its root.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors { next: Some(self) }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut t = f.debug_struct("Entity");
        t.field("name", &self.inner.name);
        if let Some(parent) = &self.inner.parent {
            t.field("parent", &parent.name());
        }
        t.finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

/// Iterator over an entity and its ancestors, most specific first.
pub struct Ancestors<'a> {
    next: Option<&'a Entity>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Entity;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}
