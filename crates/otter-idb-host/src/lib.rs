//! Otter IDB Host - an emulated IndexedDB running on its own event loop
//!
//! [`IndexedDb`] owns a thread that serves every database request in order.
//! Transactions it hands out behave like browser ones: once the owner stops
//! issuing requests for a while, or after a configured number of requests,
//! the host commits them and any further request fails with
//! `TransactionInactiveError`. [`Database`] implements
//! [`otter_idb::Backend`], so [`otter_idb::DurableTransaction`] can run on top
//! and hide all of that.
//!
//! Committed data stays in memory or, with [`Storage::File`], in a redb file
//! that is reloaded on the next start.
//!
//! ```no_run
//! use otter_idb::{CancelToken, DurableTransaction, Kvtx, TransactionScope};
//! use otter_idb_host::{HostConfig, IndexedDb, ObjectStoreOptions};
//!
//! # fn main() -> otter_idb::IdbResult<()> {
//! let idb = IndexedDb::new(HostConfig::new().file("data/app.redb"))?;
//! let db = idb.open(
//!     "app",
//!     1,
//!     |upgrade, _old, _new| upgrade.create_object_store("kv", ObjectStoreOptions::new()),
//!     &CancelToken::never(),
//! )?;
//!
//! let txn = DurableTransaction::begin(db, TransactionScope::read_write(["kv"]))?;
//! let kv = Kvtx::new(txn, "kv")?;
//! kv.set(b"greeting", b"hello")?;
//! kv.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod cursor;
mod database;
mod engine;
mod event_loop;
mod persist;
pub mod schema;
mod transaction;

pub use config::{AutoCommit, DEFAULT_IDLE_MS, HostConfig, Storage};
pub use cursor::HostCursor;
pub use database::{Database, IndexedDb};
pub use schema::{DatabaseUpgrade, ObjectStoreOptions};
pub use transaction::{HostObjectStore, HostTransaction};
