//! redb persistence for committed data
//!
//! One `schema` table maps database names to their JSON schema. Records of
//! each object store live in their own table named `idb:{db}:{store}`, with
//! JSON encoded keys and values.

use crate::engine::{DbData, StoreData, StoreDelta};
use crate::schema::ObjectStoreOptions;
use otter_idb::{IdbError, IdbResult, Key, Value};
use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

const SCHEMA: TableDefinition<&str, &[u8]> = TableDefinition::new("schema");

fn storage_err(e: impl std::fmt::Display) -> IdbError {
    IdbError::Storage(e.to_string())
}

fn records_table(db: &str, store: &str) -> String {
    format!("idb:{db}:{store}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PersistedStore {
    pub options: ObjectStoreOptions,
    pub next_key: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PersistedDb {
    pub version: u64,
    pub stores: BTreeMap<String, PersistedStore>,
}

impl PersistedDb {
    /// Schema of `db`, with key generators moved forward to `next_keys`
    pub fn from_data(db: &DbData, next_keys: &BTreeMap<String, u64>) -> Self {
        let stores = db
            .stores
            .iter()
            .map(|(name, store)| {
                let next_key = next_keys
                    .get(name)
                    .map_or(store.next_key, |n| (*n).max(store.next_key));
                (
                    name.clone(),
                    PersistedStore {
                        options: store.options.clone(),
                        next_key,
                    },
                )
            })
            .collect();
        Self {
            version: db.version,
            stores,
        }
    }
}

/// Committed data on disk
pub(crate) struct Persistence {
    db: Database,
}

impl Persistence {
    pub fn open(path: &Path) -> IdbResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(storage_err)?;
            }
        }
        let db = Database::create(path).map_err(storage_err)?;

        let write_txn = db.begin_write().map_err(storage_err)?;
        {
            write_txn.open_table(SCHEMA).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;

        debug!(path = %path.display(), "opened idb storage");
        Ok(Self { db })
    }

    /// Read every database back into memory
    pub fn load(&self) -> IdbResult<HashMap<String, DbData>> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let schema = read_txn.open_table(SCHEMA).map_err(storage_err)?;

        let mut dbs = HashMap::new();
        for entry in schema.iter().map_err(storage_err)? {
            let (name, bytes) = entry.map_err(storage_err)?;
            let name = name.value().to_string();
            let persisted: PersistedDb =
                serde_json::from_slice(bytes.value()).map_err(storage_err)?;

            let mut stores = BTreeMap::new();
            for (store, meta) in persisted.stores {
                let table_name = records_table(&name, &store);
                let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&table_name);
                let mut records = BTreeMap::new();
                match read_txn.open_table(def) {
                    Ok(table) => {
                        for entry in table.iter().map_err(storage_err)? {
                            let (key, value) = entry.map_err(storage_err)?;
                            let key: Key =
                                serde_json::from_slice(key.value()).map_err(storage_err)?;
                            let value: Value =
                                serde_json::from_slice(value.value()).map_err(storage_err)?;
                            records.insert(key, value);
                        }
                    }
                    // store never had a committed record
                    Err(TableError::TableDoesNotExist(_)) => {}
                    Err(e) => return Err(storage_err(e)),
                }
                stores.insert(
                    store,
                    StoreData {
                        options: meta.options,
                        records,
                        next_key: meta.next_key,
                    },
                );
            }
            debug!(db = %name, version = persisted.version, stores = stores.len(), "loaded database");
            dbs.insert(
                name,
                DbData {
                    version: persisted.version,
                    stores,
                },
            );
        }
        Ok(dbs)
    }

    /// Write a new schema, dropping the records of `deleted` stores
    pub fn save_schema(&self, name: &str, schema: &PersistedDb, deleted: &[String]) -> IdbResult<()> {
        let bytes = serde_json::to_vec(schema).map_err(storage_err)?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(SCHEMA).map_err(storage_err)?;
            table.insert(name, bytes.as_slice()).map_err(storage_err)?;
        }
        for store in deleted {
            let table_name = records_table(name, store);
            let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&table_name);
            write_txn.delete_table(def).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)
    }

    /// Apply one transaction's deltas atomically
    pub fn commit(
        &self,
        name: &str,
        schema: &PersistedDb,
        deltas: &BTreeMap<String, StoreDelta>,
    ) -> IdbResult<()> {
        if deltas.is_empty() {
            return Ok(());
        }
        let bytes = serde_json::to_vec(schema).map_err(storage_err)?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(SCHEMA).map_err(storage_err)?;
            table.insert(name, bytes.as_slice()).map_err(storage_err)?;
        }
        for (store, delta) in deltas {
            let table_name = records_table(name, store);
            let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&table_name);
            if delta.cleared {
                write_txn.delete_table(def).map_err(storage_err)?;
            }
            let mut table = write_txn.open_table(def).map_err(storage_err)?;
            for (key, write) in &delta.writes {
                let key = serde_json::to_vec(key).map_err(storage_err)?;
                match write {
                    Some(value) => {
                        let value = serde_json::to_vec(value).map_err(storage_err)?;
                        table
                            .insert(key.as_slice(), value.as_slice())
                            .map_err(storage_err)?;
                    }
                    None => {
                        table.remove(key.as_slice()).map_err(storage_err)?;
                    }
                }
            }
        }
        write_txn.commit().map_err(storage_err)
    }
}
