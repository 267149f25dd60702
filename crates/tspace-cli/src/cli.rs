use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tspace",
    about = "Inspect table space configuration and version stores",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log debug events to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Parse a spaces file and list its registrations
    Check(CheckArgs),
    /// List instance keys with recorded versions
    Keys(KeysArgs),
    /// Show the recorded versions of one instantiation
    Versions(VersionsArgs),
    /// Show the current table name of every registered entity
    Names(NamesArgs),
    /// Overwrite one recorded version (0 removes the record)
    SetVersion(SetVersionArgs),
}

#[derive(Args)]
pub struct CheckArgs {
    /// Spaces file (TOML)
    pub config: PathBuf,
}

#[derive(Args)]
pub struct KeysArgs {
    /// Version store file (JSON)
    #[arg(long)]
    pub store: PathBuf,
    pub namespace: String,
}

#[derive(Args)]
pub struct VersionsArgs {
    #[arg(long)]
    pub store: PathBuf,
    pub namespace: String,
    pub instance_key: String,
}

#[derive(Args)]
pub struct NamesArgs {
    #[arg(long)]
    pub config: PathBuf,
    #[arg(long)]
    pub store: PathBuf,
    pub namespace: String,
    pub instance_key: String,
}

#[derive(Args)]
pub struct SetVersionArgs {
    #[arg(long)]
    pub store: PathBuf,
    pub namespace: String,
    pub instance_key: String,
    pub entity: String,
    pub version: u32,
}
