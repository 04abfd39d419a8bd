//! Otter IDB - durable transactions over IndexedDB-style stores
//!
//! IndexedDB transactions commit on their own as soon as the caller stops
//! issuing requests, which makes them useless as long-lived read/write
//! transactions. This crate hides that:
//!
//! - [`DurableTransaction`] reopens the backing transaction whenever it has
//!   gone inactive and replays mutations that were queued meanwhile.
//! - [`DurableObjectStore`] applies mutations immediately when it can and
//!   queues them otherwise; reads retry a bounded number of times.
//! - [`Kvtx`] is a byte-oriented key-value API on top, with prefix scans.
//!
//! The backing store is anything implementing the [`binding`] traits.
//! [`memory::MemoryBackend`] is an in-process implementation with fault
//! injection; `otter-idb-host` provides an event-loop driven one.
//!
//! # Usage
//!
//! ```no_run
//! use otter_idb::memory::MemoryBackend;
//! use otter_idb::{DurableTransaction, Kvtx, TransactionScope};
//!
//! # fn main() -> otter_idb::IdbResult<()> {
//! let backend = MemoryBackend::with_stores(["kv"]);
//! let txn = DurableTransaction::begin(backend.clone(), TransactionScope::read_write(["kv"]))?;
//! let kv = Kvtx::new(txn, "kv")?;
//!
//! kv.set(b"user/1", b"ada")?;
//! backend.expire_all(); // the backing transaction goes away
//! kv.set(b"user/2", b"grace")?; // queued
//! kv.commit()?; // restarts, replays, commits
//!
//! kv.scan_prefix(b"user/", |key, value| {
//!     println!("{key:?} = {value:?}");
//!     Ok::<_, otter_idb::IdbError>(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod config;
pub mod durable;
pub mod error;
pub mod key;
pub mod kvtx;
pub mod memory;
pub mod request;

pub use binding::{
    Backend, CursorEntry, CursorHandle, StoreHandle, TransactionHandle, TransactionMode,
    TransactionScope, count_limit,
};
pub use config::{DEFAULT_MAX_ATTEMPTS, DurableConfig};
pub use durable::{DurableCursor, DurableObjectStore, DurableTransaction, Mutation, OpLog};
pub use error::{DomErrorName, INACTIVE_MESSAGE, IdbError, IdbResult, is_transaction_inactive};
pub use key::{Key, KeyRange, Query, Value};
pub use kvtx::Kvtx;
pub use request::{CancelSource, CancelToken, Completer, Pending, request};
