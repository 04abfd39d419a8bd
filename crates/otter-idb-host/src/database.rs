//! Host startup, database connections and the upgrade handshake

use crate::config::{HostConfig, Storage};
use crate::engine::HostState;
use crate::event_loop::{Job, run_host};
use crate::persist::Persistence;
use crate::schema::DatabaseUpgrade;
use crate::transaction::HostTransaction;
use crossbeam_channel::{Sender, bounded};
use otter_idb::request::{Completer, request};
use otter_idb::{Backend, CancelToken, IdbError, IdbResult, TransactionScope};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Sending half of the host thread, shared by every handle
pub(crate) struct HostInner {
    jobs: Sender<Job>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HostInner {
    /// Queue a job without waiting for it
    pub fn send(&self, job: Job) -> IdbResult<()> {
        self.jobs.send(job).map_err(|_| IdbError::HostClosed)
    }

    /// Queue a job and block until it answers
    pub fn call<T>(&self, make: impl FnOnce(Completer<T>) -> Job) -> IdbResult<T> {
        let (completer, pending) = request();
        self.send(make(completer))?;
        pending.wait()
    }

    pub fn call_cancellable<T>(
        &self,
        cancel: &CancelToken,
        make: impl FnOnce(Completer<T>) -> Job,
    ) -> IdbResult<T> {
        cancel.check()?;
        let (completer, pending) = request();
        self.send(make(completer))?;
        pending.wait_cancellable(cancel)
    }
}

impl Drop for HostInner {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("idb host thread panicked");
            }
        }
    }
}

/// An emulated IndexedDB factory backed by its own event loop thread.
///
/// Transactions started here auto-commit according to
/// [`HostConfig::auto_commit`], whether or not their owner is done with them.
#[derive(Clone)]
pub struct IndexedDb {
    inner: Arc<HostInner>,
}

impl std::fmt::Debug for IndexedDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedDb").finish_non_exhaustive()
    }
}

impl IndexedDb {
    /// Start the host thread
    pub fn new(config: HostConfig) -> IdbResult<Self> {
        let persist = match &config.storage {
            Storage::Memory => None,
            Storage::File(path) => Some(Persistence::open(path)?),
        };
        let state = HostState::new(config.auto_commit, persist)?;

        let (jobs, job_rx) = bounded(config.queue_capacity.max(1));
        let handle = std::thread::Builder::new()
            .name("otter-idb-host".to_string())
            .spawn(move || run_host(job_rx, state))
            .map_err(|e| IdbError::Storage(format!("failed to spawn host thread: {e}")))?;

        debug!(storage = ?config.storage, auto_commit = ?config.auto_commit, "idb host started");
        Ok(Self {
            inner: Arc::new(HostInner {
                jobs,
                thread: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Open `name` at `version`, creating it if needed.
    ///
    /// When `version` is above the stored version, `upgrade` runs with the
    /// old and new version numbers and may create or delete object stores.
    /// An error from `upgrade` leaves the database untouched.
    pub fn open<F>(
        &self,
        name: &str,
        version: u64,
        upgrade: F,
        cancel: &CancelToken,
    ) -> IdbResult<Database>
    where
        F: FnOnce(&mut DatabaseUpgrade, u64, u64) -> IdbResult<()>,
    {
        let outcome = self.inner.call_cancellable(cancel, |reply| Job::OpenDb {
            name: name.to_string(),
            version,
            reply,
        })?;

        let stores = if version > outcome.old_version {
            let mut editor = DatabaseUpgrade::new(name.to_string(), outcome.stores);
            upgrade(&mut editor, outcome.old_version, version)?;
            cancel.check()?;
            let changes = editor.into_changes();
            self.inner.call(|reply| Job::Upgrade {
                name: name.to_string(),
                version,
                changes,
                reply,
            })?
        } else {
            outcome.stores.into_keys().collect()
        };

        debug!(db = name, version, stores = stores.len(), "database opened");
        Ok(Database {
            host: self.inner.clone(),
            name: name.to_string(),
            version,
            stores,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// A connection to one database
#[derive(Clone)]
pub struct Database {
    host: Arc<HostInner>,
    name: String,
    version: u64,
    stores: Vec<String>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Object stores as of the time this connection was opened
    pub fn object_store_names(&self) -> &[String] {
        &self.stores
    }

    /// Refuse new transactions on this connection and its clones.
    /// Transactions already started keep running.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> IdbResult<()> {
        if self.is_closed() {
            return Err(IdbError::invalid_state("The database connection is closing."));
        }
        Ok(())
    }
}

impl Backend for Database {
    type Transaction = HostTransaction;

    fn open_transaction(&self, scope: &TransactionScope) -> IdbResult<HostTransaction> {
        self.check_open()?;
        let id = self.host.call(|reply| Job::Begin {
            db: self.name.clone(),
            scope: scope.clone(),
            reply,
        })?;
        Ok(HostTransaction::new(self.host.clone(), id, scope.clone()))
    }

    fn open_transaction_cancellable(
        &self,
        scope: &TransactionScope,
        cancel: &CancelToken,
    ) -> IdbResult<HostTransaction> {
        self.check_open()?;
        let id = self.host.call_cancellable(cancel, |reply| Job::Begin {
            db: self.name.clone(),
            scope: scope.clone(),
            reply,
        })?;
        Ok(HostTransaction::new(self.host.clone(), id, scope.clone()))
    }
}
