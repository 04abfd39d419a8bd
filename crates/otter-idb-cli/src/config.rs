//! Configuration file parsing for otter-idb.toml.

use otter_idb::DurableConfig;
use otter_idb_host::HostConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Which database and object store the commands work on
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Event loop host settings (storage, auto-commit policy)
    #[serde(default)]
    pub host: HostConfig,

    /// Restart bounds of durable transactions
    #[serde(default)]
    pub durable: DurableConfig,
}

/// Database selection.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_store")]
    pub store: String,

    #[serde(default = "default_version")]
    pub version: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            store: default_store(),
            version: default_version(),
        }
    }
}

fn default_name() -> String {
    "otter".to_string()
}

fn default_store() -> String {
    "kv".to_string()
}

fn default_version() -> u64 {
    1
}

/// Load configuration from a file or search for default config files.
///
/// An explicitly given path must exist; a missing default file means
/// default settings.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = path
        && !path.exists()
    {
        anyhow::bail!("Config file {} does not exist", path.display());
    }
    let config_path = path.map(PathBuf::from).or_else(find_config_file);

    match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

const CONFIG_NAMES: &[&str] = &["otter-idb.toml", ".otter-idb.toml"];

/// Search for configuration file in the current directory and parent directories.
fn find_config_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;

    let mut dir = Some(cwd.as_path());
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }

    None
}
