use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use colored::Colorize;
use serde_json::json;
use tspace_registry::{Backends, Registry, SpacesConfig};
use tspace_storage::InMemoryStorage;
use tspace_store::{FileVersionStore, InMemoryVersionStore, VersionMap, VersionStore};
use tspace_types::{naming, EntityKey, Version};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Check(args) => cmd_check(args, format),
        Command::Keys(args) => cmd_keys(args, format),
        Command::Versions(args) => cmd_versions(args, format),
        Command::Names(args) => cmd_names(args, format),
        Command::SetVersion(args) => cmd_set_version(args, format),
    }
}

#[derive(Debug, PartialEq, Eq)]
struct RegistrationRow {
    namespace: String,
    entity: String,
    history_depth: u32,
    base_name: String,
}

#[derive(Debug, PartialEq, Eq)]
struct NameRow {
    entity: String,
    version: Version,
    table: String,
}

fn load_config(path: &Path) -> anyhow::Result<SpacesConfig> {
    SpacesConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

/// A registry that never touches physical tables.
fn offline_registry(
    config: &SpacesConfig,
    versions: Arc<dyn VersionStore>,
) -> anyhow::Result<Registry> {
    let backends = Backends::new(versions, Arc::new(InMemoryStorage::new()));
    let registry = Registry::new(backends, config.registry.clone());
    config.apply(&registry)?;
    Ok(registry)
}

fn registrations(registry: &Registry) -> anyhow::Result<Vec<RegistrationRow>> {
    let mut rows = Vec::new();
    for namespace in registry.namespaces() {
        let space = registry.entity_space(&namespace)?;
        for registration in space.registrations() {
            rows.push(RegistrationRow {
                namespace: namespace.clone(),
                entity: registration.entity.name().to_string(),
                history_depth: registration.history_depth,
                base_name: registration.base_name(),
            });
        }
    }
    Ok(rows)
}

fn current_names(
    registry: &Registry,
    namespace: &str,
    instance_key: &str,
) -> anyhow::Result<Vec<NameRow>> {
    let space = registry.entity_space(namespace)?;
    let stored = space
        .backends()
        .versions
        .read_versions(namespace, instance_key)?;
    space
        .registrations()
        .iter()
        .map(|registration| -> anyhow::Result<NameRow> {
            let recorded = stored.get(&registration.key()).copied().unwrap_or(0);
            let version = naming::normalize(registration.history_depth, recorded);
            Ok(NameRow {
                entity: registration.entity.name().to_string(),
                version,
                table: space.physical_name(instance_key, registration, version)?,
            })
        })
        .collect()
}

fn cmd_check(args: CheckArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let registry = offline_registry(&config, Arc::new(InMemoryVersionStore::new()))?;
    let rows = registrations(&registry)?;

    if format == OutputFormat::Json {
        let spaces: Vec<_> = rows
            .iter()
            .map(|r| {
                json!({
                    "namespace": r.namespace,
                    "entity": r.entity,
                    "history_depth": r.history_depth,
                    "base_name": r.base_name,
                })
            })
            .collect();
        println!(
            "{}",
            json!({ "enforce_context": config.registry.enforce_context, "registrations": spaces })
        );
        return Ok(());
    }

    println!("{} {} is valid", "✓".green().bold(), args.config.display());
    let mut namespace = None;
    for row in &rows {
        if namespace != Some(&row.namespace) {
            println!("{}", row.namespace.yellow().bold());
            namespace = Some(&row.namespace);
        }
        println!(
            "  {:<24} depth {}  base {}",
            row.entity,
            row.history_depth,
            row.base_name.cyan()
        );
    }
    if !config.registry.enforce_context {
        println!("{}", "context enforcement disabled".dimmed());
    }
    Ok(())
}

fn cmd_keys(args: KeysArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = FileVersionStore::open(&args.store);
    let keys = store.list_instance_keys(&args.namespace)?;

    if format == OutputFormat::Json {
        println!("{}", json!({ "namespace": args.namespace, "instance_keys": keys }));
    } else if keys.is_empty() {
        println!("No instance keys recorded for {}.", args.namespace.yellow());
    } else {
        for key in keys {
            println!("{}", key);
        }
    }
    Ok(())
}

fn cmd_versions(args: VersionsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = FileVersionStore::open(&args.store);
    let versions = store.read_versions(&args.namespace, &args.instance_key)?;

    if format == OutputFormat::Json {
        println!(
            "{}",
            json!({
                "namespace": args.namespace,
                "instance_key": args.instance_key,
                "versions": versions,
            })
        );
    } else if versions.is_empty() {
        println!(
            "{}/{}: every entity at version 0",
            args.namespace.yellow(),
            args.instance_key.yellow()
        );
    } else {
        for (entity, version) in &versions {
            println!("{:<24} {}", entity, version.to_string().bold());
        }
    }
    Ok(())
}

fn cmd_names(args: NamesArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let registry = offline_registry(&config, Arc::new(FileVersionStore::open(&args.store)))?;
    let rows = current_names(&registry, &args.namespace, &args.instance_key)?;

    if format == OutputFormat::Json {
        let names: Vec<_> = rows
            .iter()
            .map(|r| json!({ "entity": r.entity, "version": r.version, "table": r.table }))
            .collect();
        println!("{}", json!(names));
        return Ok(());
    }
    for row in &rows {
        println!("{:<24} {}  (v{})", row.entity, row.table.cyan(), row.version);
    }
    Ok(())
}

fn cmd_set_version(args: SetVersionArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = FileVersionStore::open(&args.store);
    let mut update = VersionMap::new();
    update.insert(EntityKey::new(args.entity.clone()), args.version);
    store
        .write_versions(&args.namespace, &args.instance_key, &update)
        .with_context(|| format!("writing {}", args.store.display()))?;

    if format == OutputFormat::Json {
        println!(
            "{}",
            json!({
                "namespace": args.namespace,
                "instance_key": args.instance_key,
                "entity": args.entity,
                "version": args.version,
            })
        );
    } else {
        println!(
            "{} {}/{} {} = {}",
            "✓".green().bold(),
            args.namespace,
            args.instance_key,
            args.entity.bold(),
            args.version
        );
    }
    Ok(())
}
