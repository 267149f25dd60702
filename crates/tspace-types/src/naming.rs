//! Deterministic physical names for versioned tables.
//!
//! A physical name is assembled from up to four parts joined by `__`:
//!
//! ```text
//! <namespace>__<instance_key>__<base_name>__<version>
//! ```
//!
//! Empty namespace or instance-key parts are omitted, and version 0 never
//! carries a suffix. Versions live on a ring of size `history_depth + 1`, so
//! the sequence of names for an entity cycles deterministically.
//!
//! All functions here are pure.

use heck::ToSnakeCase;

use crate::error::{NamingError, Result};

/// A position on an entity's version ring. 0 is the base representation.
pub type Version = u32;

/// Separator between name parts.
pub const SEPARATOR: &str = "__";

/// Default physical name for an entity name: snake case, last word pluralised.
///
/// Pluralisation only knows the regular English suffix rules. Irregular
/// nouns come out wrong (`Person` gives `persons`, `Leaf` gives `leafs`);
/// register such entities with an explicit `base_name` option instead.
///
/// ```
/// use tspace_types::naming::base_name;
///
/// assert_eq!(base_name("FooBar"), "foo_bars");
/// assert_eq!(base_name("Category"), "categories");
/// ```
pub fn base_name(entity_name: &str) -> String {
    pluralize(&entity_name.to_snake_case())
}

fn pluralize(word: &str) -> String {
    const SIBILANT: &[&str] = &["s", "x", "z", "ch", "sh"];

    if word.is_empty() {
        return String::new();
    }
    if SIBILANT.iter().any(|suffix| word.ends_with(suffix)) {
        return format!("{word}es");
    }
    if let Some(stem) = word.strip_suffix('y') {
        let before_y = stem.chars().last();
        if matches!(before_y, Some(c) if !"aeiou".contains(c)) {
            return format!("{stem}ies");
        }
    }
    format!("{word}s")
}

/// Join non-empty `namespace` and `instance_key` prefixes onto `base_name`.
///
/// An instance key only exists inside a namespace, so a non-empty key with an
/// empty namespace is rejected.
pub fn namespaced_name(namespace: &str, instance_key: &str, base_name: &str) -> Result<String> {
    if namespace.is_empty() && !instance_key.is_empty() {
        return Err(NamingError::InstanceKeyWithoutNamespace {
            instance_key: instance_key.to_string(),
            base_name: base_name.to_string(),
        });
    }

    let name = [namespace, instance_key, base_name]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(SEPARATOR);
    Ok(name)
}

/// The namespaced name with a `__<version>` suffix when `version > 0`.
pub fn versioned_name(
    namespace: &str,
    instance_key: &str,
    base_name: &str,
    version: Version,
) -> Result<String> {
    let name = namespaced_name(namespace, instance_key, base_name)?;
    if version > 0 {
        Ok(format!("{name}{SEPARATOR}{version}"))
    } else {
        Ok(name)
    }
}

/// Reduce `version` onto the ring of size `history_depth + 1`.
pub fn normalize(history_depth: u32, version: Version) -> Version {
    (u64::from(version) % (u64::from(history_depth) + 1)) as Version
}

/// The version following `current` on the ring.
///
/// With `history_depth == 0` this is always 0: the table is rewritten in place.
pub fn next_version(history_depth: u32, current: Version) -> Version {
    ((u64::from(current) + 1) % (u64::from(history_depth) + 1)) as Version
}

/// Physical name of `version` after normalising it onto the ring.
pub fn table_name(
    namespace: &str,
    instance_key: &str,
    base_name: &str,
    history_depth: u32,
    version: Version,
) -> Result<String> {
    versioned_name(
        namespace,
        instance_key,
        base_name,
        normalize(history_depth, version),
    )
}
