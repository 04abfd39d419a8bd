mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::demo::DemoCommand;
use commands::kv::{DeleteCommand, GetCommand, ScanCommand, SetCommand, SizeCommand};
use otter_idb_host::Storage;
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser)]
#[command(
    name = "otter-idb",
    version,
    about = "Key-value store on durable IndexedDB-style transactions"
)]
struct Cli {
    /// Config file (default: otter-idb.toml in this or a parent directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// redb file to keep data in (overrides the config file)
    #[arg(long, global = true)]
    file: Option<PathBuf>,

    /// Database name
    #[arg(long, global = true)]
    db: Option<String>,

    /// Object store name
    #[arg(long, global = true)]
    store: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a value
    Set(SetCommand),
    /// Print a value
    Get(GetCommand),
    /// Remove a key
    Delete(DeleteCommand),
    /// List entries under a prefix
    Scan(ScanCommand),
    /// Count entries
    Size(SizeCommand),
    /// Write and read back entries on a host that commits after every request
    Demo(DemoCommand),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(file) = cli.file {
        config.host.storage = Storage::File(file);
    }
    if let Some(db) = cli.db {
        config.database.name = db;
    }
    if let Some(store) = cli.store {
        config.database.store = store;
    }

    match cli.command {
        Commands::Set(cmd) => cmd.run(&config)?,
        Commands::Get(cmd) => cmd.run(&config)?,
        Commands::Delete(cmd) => cmd.run(&config)?,
        Commands::Scan(cmd) => cmd.run(&config)?,
        Commands::Size(cmd) => cmd.run(&config)?,
        Commands::Demo(cmd) => cmd.run(&config)?,
    }

    Ok(())
}
