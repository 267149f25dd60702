//! Registry configuration and declarative space definitions.
//!
//! A spaces file declares entities, their parents, and which namespace each
//! entity is registered in:
//!
//! ```toml
//! [registry]
//! enforce_context = true
//!
//! [entities]
//! Item = {}
//! SpecialItem = { parent = "Item" }
//!
//! [spaces.catalog]
//! Item = { history_depth = 2, base_name = "some_items" }
//! User = {}
//! ```
//!
//! Entities named only under `[spaces.*]` are implicitly parentless.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use tspace_types::Entity;

use crate::error::TablespaceError;
use crate::registry::Registry;

/// Behaviour switches for a [`Registry`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// When `false`, table names resolve to unprefixed base names outside
    /// any activation instead of failing.
    pub enforce_context: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enforce_context: true,
        }
    }
}

/// Declaration of one entity in a spaces file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntityDecl {
    pub parent: Option<String>,
}

/// Errors loading or applying a spaces file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid spaces file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("entity {entity} declares unknown parent {parent}")]
    UnknownParent { entity: String, parent: String },

    #[error("entity parent cycle: {chain}")]
    Cycle { chain: String },

    #[error(transparent)]
    Registration(#[from] TablespaceError),
}

/// A parsed spaces file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpacesConfig {
    pub registry: RegistryConfig,
    pub entities: BTreeMap<String, EntityDecl>,
    /// namespace -> entity name -> registration options
    pub spaces: BTreeMap<String, BTreeMap<String, toml::Table>>,
}

impl SpacesConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(src)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let src = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    /// Build entity descriptors for every declared or referenced entity.
    pub fn entities(&self) -> Result<BTreeMap<String, Entity>, ConfigError> {
        let mut resolved = BTreeMap::new();
        for name in self.entities.keys() {
            self.resolve(name, &mut resolved, &mut Vec::new())?;
        }
        for members in self.spaces.values() {
            for name in members.keys() {
                resolved
                    .entry(name.clone())
                    .or_insert_with(|| Entity::new(name.clone()));
            }
        }
        Ok(resolved)
    }

    fn resolve(
        &self,
        name: &str,
        resolved: &mut BTreeMap<String, Entity>,
        visiting: &mut Vec<String>,
    ) -> Result<Entity, ConfigError> {
        if let Some(entity) = resolved.get(name) {
            return Ok(entity.clone());
        }
        if visiting.iter().any(|v| v == name) {
            visiting.push(name.to_string());
            return Err(ConfigError::Cycle {
                chain: visiting.join(" -> "),
            });
        }

        let parent = self.entities.get(name).and_then(|decl| decl.parent.clone());
        visiting.push(name.to_string());
        let entity = match parent {
            None => Entity::new(name),
            Some(parent) => {
                if !self.entities.contains_key(&parent) {
                    return Err(ConfigError::UnknownParent {
                        entity: name.to_string(),
                        parent,
                    });
                }
                let parent = self.resolve(&parent, resolved, visiting)?;
                Entity::with_parent(name, &parent)
            }
        };
        visiting.pop();

        resolved.insert(name.to_string(), entity.clone());
        Ok(entity)
    }

    /// Create every space and register its entities in `registry`.
    ///
    /// Returns the entity descriptors so callers can address them by name.
    pub fn apply(&self, registry: &Registry) -> Result<BTreeMap<String, Entity>, ConfigError> {
        let entities = self.entities()?;
        for (namespace, members) in &self.spaces {
            registry.ensure_space(namespace);
            for (name, options) in members {
                let entity = entities
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| Entity::new(name.clone()));
                registry.register_entity_with_table(&entity, namespace, options)?;
            }
            debug!(namespace = %namespace, entities = members.len(), "space configured");
        }
        Ok(entities)
    }
}
