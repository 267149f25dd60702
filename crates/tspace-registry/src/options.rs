//! Registration options for entities joining an entity space.

use serde::{Deserialize, Serialize};
use toml::Value;

use crate::error::{Result, TablespaceError};

/// Option keys understood by [`RegistrationOptions::from_table`].
pub const OPTION_KEYS: &[&str] = &["history_depth", "base_name"];

/// How an entity is versioned inside its space.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrationOptions {
    /// Number of historical copies kept besides the base table.
    pub history_depth: u32,
    /// Physical base name, overriding the one derived from the entity name.
    pub base_name: Option<String>,
}

impl RegistrationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_depth(mut self, history_depth: u32) -> Self {
        self.history_depth = history_depth;
        self
    }

    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = Some(base_name.into());
        self
    }

    /// Parse options for `entity` from a dynamic table (e.g. a config file).
    ///
    /// Every unknown key is reported at once, sorted.
    pub fn from_table(entity: &str, table: &toml::Table) -> Result<Self> {
        let mut unknown: Vec<String> = table
            .keys()
            .filter(|k| !OPTION_KEYS.contains(&k.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            unknown.sort();
            return Err(TablespaceError::UnknownOption {
                entity: entity.to_string(),
                keys: unknown,
            });
        }

        let invalid = |key: &str, reason: String| TablespaceError::InvalidOption {
            entity: entity.to_string(),
            key: key.to_string(),
            reason,
        };

        let mut options = Self::new();
        if let Some(value) = table.get("history_depth") {
            options.history_depth = match value {
                Value::Integer(n) => u32::try_from(*n)
                    .map_err(|_| invalid("history_depth", format!("{n} is out of range")))?,
                other => {
                    return Err(invalid(
                        "history_depth",
                        format!("expected an integer, found {}", other.type_str()),
                    ))
                }
            };
        }
        if let Some(value) = table.get("base_name") {
            match value {
                Value::String(s) if !s.is_empty() => options.base_name = Some(s.clone()),
                Value::String(_) => {
                    return Err(invalid("base_name", "must not be empty".to_string()))
                }
                other => {
                    return Err(invalid(
                        "base_name",
                        format!("expected a string, found {}", other.type_str()),
                    ))
                }
            }
        }
        Ok(options)
    }
}
