//! CLI command implementations.

pub mod demo;
pub mod kv;

use crate::config::Config;
use anyhow::{Context, Result};
use otter_idb::{CancelToken, DurableTransaction, Kvtx, TransactionScope};
use otter_idb_host::{Database, IndexedDb, ObjectStoreOptions};
use tracing::debug;

/// Open the configured database, creating the store on first use
pub fn open_database(config: &Config) -> Result<Database> {
    let idb = IndexedDb::new(config.host.clone()).context("failed to start idb host")?;
    let store = config.database.store.clone();
    let db = idb
        .open(
            &config.database.name,
            config.database.version,
            |upgrade, old, new| {
                debug!(old, new, "upgrading database");
                if !upgrade.contains_object_store(&store) {
                    upgrade.create_object_store(store.as_str(), ObjectStoreOptions::new())?;
                }
                Ok(())
            },
            &CancelToken::never(),
        )
        .with_context(|| format!("failed to open database '{}'", config.database.name))?;
    Ok(db)
}

/// Read-write key-value view of the configured store
pub fn open_kv(config: &Config) -> Result<Kvtx<Database>> {
    let db = open_database(config)?;
    let store = &config.database.store;
    if !db.object_store_names().iter().any(|s| s == store) {
        anyhow::bail!(
            "object store '{store}' does not exist in '{}' (version {}); bump [database].version to create it",
            db.name(),
            db.version()
        );
    }
    let txn = DurableTransaction::begin_with_config(
        db,
        TransactionScope::read_write([store.as_str()]),
        config.durable,
    )?;
    Ok(Kvtx::new(txn, store)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_idb_host::Storage;

    #[test]
    fn test_open_kv_persists_between_runs() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.host.storage = Storage::File(dir.path().join("cli.redb"));

        {
            let kv = open_kv(&config).unwrap();
            kv.set(b"name", b"otter").unwrap();
            kv.commit().unwrap();
        }

        let kv = open_kv(&config).unwrap();
        assert_eq!(kv.get(b"name").unwrap(), Some(b"otter".to_vec()));
    }

    #[test]
    fn test_unknown_store_needs_version_bump() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.host.storage = Storage::File(dir.path().join("cli.redb"));
        drop(open_kv(&config).unwrap());

        config.database.store = "other".to_string();
        let err = open_kv(&config).unwrap_err();
        assert!(err.to_string().contains("bump [database].version"));

        config.database.version = 2;
        open_kv(&config).unwrap();
    }
}
