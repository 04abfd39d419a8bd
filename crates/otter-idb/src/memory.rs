//! In-process backing store
//!
//! [`MemoryBackend`] behaves like an IndexedDB database whose transactions
//! commit when the last handle goes away or when they are told to go
//! inactive. It is deterministic, so tests can make a transaction go inactive
//! exactly where they want:
//!
//! - [`MemoryBackend::fail_on`] makes the n-th call of one request kind find
//!   its transaction already auto-committed,
//! - [`MemoryBackend::set_request_budget`] auto-commits every transaction
//!   after a fixed number of requests,
//! - [`MemoryBackend::expire_all`] auto-commits everything that is open.
//!
//! Successful mutations are recorded so tests can check that nothing was
//! applied twice.

use crate::binding::{
    Backend, CursorEntry, CursorHandle, StoreHandle, TransactionHandle, TransactionMode,
    TransactionScope, count_limit,
};
use crate::error::{DomErrorName, IdbError, IdbResult};
use crate::key::{Key, KeyRange, Query, Value};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Request kinds that faults can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    Open,
    Put,
    Add,
    Delete,
    Clear,
    Get,
    GetKey,
    GetAll,
    GetAllKeys,
    Count,
    OpenCursor,
    Advance,
    Commit,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Nth(usize),
    Always,
}

#[derive(Debug)]
struct Fault {
    op: MemoryOp,
    trigger: Trigger,
    seen: usize,
}

/// Counters kept by a [`MemoryBackend`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Transactions opened
    pub opens: usize,
    /// Explicit commits that succeeded
    pub commits: usize,
    /// Transactions that committed because they were left idle, expired,
    /// ran out of requests, or were hit by a fault
    pub auto_commits: usize,
    pub aborts: usize,
    /// Store requests accepted
    pub requests: usize,
    pub faults_injected: usize,
}

/// A mutation the backend accepted
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMutation {
    pub txn: u64,
    pub store: String,
    pub op: MemoryOp,
    pub key: Option<Key>,
}

#[derive(Debug, Clone)]
enum Write {
    Put(Key, Value),
    Delete(Query),
    Clear,
}

impl Write {
    fn apply(&self, map: &mut BTreeMap<Key, Value>) {
        match self {
            Write::Put(key, value) => {
                map.insert(key.clone(), value.clone());
            }
            Write::Delete(query) => {
                let doomed: Vec<Key> = select(map, query).map(|(k, _)| k.clone()).collect();
                for key in doomed {
                    map.remove(&key);
                }
            }
            Write::Clear => map.clear(),
        }
    }
}

fn select<'a>(
    map: &'a BTreeMap<Key, Value>,
    query: &Query,
) -> Box<dyn Iterator<Item = (&'a Key, &'a Value)> + 'a> {
    match query.bounds() {
        Some(bounds) => Box::new(map.range::<Key, _>(bounds)),
        None => Box::new(std::iter::empty()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    Committed,
    Aborted,
}

#[derive(Debug)]
struct TxnRecord {
    scope: TransactionScope,
    status: Status,
    requests: usize,
    writes: Vec<(String, Write)>,
}

#[derive(Debug, Default)]
struct Shared {
    stores: BTreeMap<String, BTreeMap<Key, Value>>,
    txns: HashMap<u64, TxnRecord>,
    next_txn: u64,
    faults: Vec<Fault>,
    calls: HashMap<MemoryOp, usize>,
    budget: Option<usize>,
    stats: MemoryStats,
    applied: Vec<AppliedMutation>,
}

impl Shared {
    /// Fire any fault registered for `op`, returning whether one fired
    fn trip(&mut self, op: MemoryOp) -> bool {
        *self.calls.entry(op).or_default() += 1;
        let mut fired = false;
        self.faults.retain_mut(|fault| {
            if fault.op != op {
                return true;
            }
            fault.seen += 1;
            match fault.trigger {
                Trigger::Always => {
                    fired = true;
                    true
                }
                Trigger::Nth(n) if fault.seen == n => {
                    fired = true;
                    false
                }
                Trigger::Nth(_) => true,
            }
        });
        if fired {
            self.stats.faults_injected += 1;
        }
        fired
    }

    fn finish(&mut self, id: u64, status: Status) {
        let Some(record) = self.txns.get_mut(&id) else {
            return;
        };
        if record.status != Status::Active {
            return;
        }
        record.status = status;
        let writes = std::mem::take(&mut record.writes);
        if status == Status::Committed {
            for (store, write) in &writes {
                if let Some(map) = self.stores.get_mut(store) {
                    write.apply(map);
                }
            }
        }
    }

    fn auto_commit(&mut self, id: u64) {
        if self.txns.get(&id).is_some_and(|r| r.status == Status::Active) {
            trace!(txn = id, "auto-commit");
            self.finish(id, Status::Committed);
            self.stats.auto_commits += 1;
        }
    }

    /// Admit one request against transaction `id`
    fn admit(&mut self, id: u64, op: MemoryOp) -> IdbResult<()> {
        let active = self
            .txns
            .get(&id)
            .is_some_and(|r| r.status == Status::Active);
        if !active {
            return Err(IdbError::transaction_inactive());
        }
        if self.trip(op) {
            trace!(txn = id, ?op, "fault injected");
            self.auto_commit(id);
            return Err(IdbError::transaction_inactive());
        }
        let served = self.txns.get(&id).map_or(0, |r| r.requests);
        if self.budget.is_some_and(|limit| served >= limit) {
            self.auto_commit(id);
            return Err(IdbError::transaction_inactive());
        }
        if let Some(record) = self.txns.get_mut(&id) {
            record.requests += 1;
        }
        self.stats.requests += 1;
        Ok(())
    }

    /// Committed contents of `store` with the writes of `id` applied on top
    fn view(&self, id: u64, store: &str) -> BTreeMap<Key, Value> {
        let mut map = self.stores.get(store).cloned().unwrap_or_default();
        if let Some(record) = self.txns.get(&id) {
            for (name, write) in &record.writes {
                if name == store {
                    write.apply(&mut map);
                }
            }
        }
        map
    }

    fn record_write(&mut self, id: u64, store: &str, op: MemoryOp, key: Option<Key>, write: Write) {
        if let Some(record) = self.txns.get_mut(&id) {
            record.writes.push((store.to_string(), write));
        }
        self.applied.push(AppliedMutation {
            txn: id,
            store: store.to_string(),
            op,
            key,
        });
    }
}

/// Deterministic in-memory database
#[derive(Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Mutex<Shared>>,
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("MemoryBackend")
            .field("stores", &shared.stores.keys().collect::<Vec<_>>())
            .field("stats", &shared.stats)
            .finish()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend with the given empty object stores
    pub fn with_stores<I, S>(stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::new();
        for store in stores {
            backend.create_store(store);
        }
        backend
    }

    pub fn create_store(&self, name: impl Into<String>) {
        self.shared.lock().stores.entry(name.into()).or_default();
    }

    /// Write directly to committed state, bypassing transactions
    pub fn insert_committed(&self, store: &str, key: impl Into<Key>, value: impl Into<Value>) {
        self.shared
            .lock()
            .stores
            .entry(store.to_string())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Committed contents of `store` in key order
    pub fn dump(&self, store: &str) -> Vec<(Key, Value)> {
        self.shared
            .lock()
            .stores
            .get(store)
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Make the `nth` call of `op` from now on find its transaction inactive
    pub fn fail_on(&self, op: MemoryOp, nth: usize) {
        self.shared.lock().faults.push(Fault {
            op,
            trigger: Trigger::Nth(nth.max(1)),
            seen: 0,
        });
    }

    /// Make every call of `op` find its transaction inactive
    pub fn fail_always(&self, op: MemoryOp) {
        self.shared.lock().faults.push(Fault {
            op,
            trigger: Trigger::Always,
            seen: 0,
        });
    }

    pub fn clear_faults(&self) {
        self.shared.lock().faults.clear();
    }

    /// Auto-commit every transaction once it has served `budget` requests
    pub fn set_request_budget(&self, budget: Option<usize>) {
        self.shared.lock().budget = budget;
    }

    /// Auto-commit every open transaction, as if the caller had yielded
    pub fn expire_all(&self) {
        let mut shared = self.shared.lock();
        let open: Vec<u64> = shared
            .txns
            .iter()
            .filter(|(_, r)| r.status == Status::Active)
            .map(|(id, _)| *id)
            .collect();
        for id in open {
            shared.auto_commit(id);
        }
    }

    pub fn stats(&self) -> MemoryStats {
        self.shared.lock().stats
    }

    /// Number of times `op` was attempted, including failed attempts
    pub fn calls(&self, op: MemoryOp) -> usize {
        self.shared.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Every accepted mutation, in order
    pub fn applied(&self) -> Vec<AppliedMutation> {
        self.shared.lock().applied.clone()
    }

    /// Accepted put/add requests for `key` in `store`
    pub fn put_count(&self, store: &str, key: &Key) -> usize {
        self.shared
            .lock()
            .applied
            .iter()
            .filter(|m| {
                m.store == store
                    && matches!(m.op, MemoryOp::Put | MemoryOp::Add)
                    && m.key.as_ref() == Some(key)
            })
            .count()
    }
}

impl Backend for MemoryBackend {
    type Transaction = MemoryTransaction;

    fn open_transaction(&self, scope: &TransactionScope) -> IdbResult<MemoryTransaction> {
        let mut shared = self.shared.lock();
        if let Some(missing) = scope
            .stores()
            .iter()
            .find(|name| !shared.stores.contains_key(name.as_str()))
        {
            return Err(IdbError::not_found(format!(
                "object store '{missing}' does not exist"
            )));
        }
        if shared.trip(MemoryOp::Open) {
            return Err(IdbError::transaction_inactive());
        }

        let id = shared.next_txn;
        shared.next_txn += 1;
        shared.stats.opens += 1;
        shared.txns.insert(
            id,
            TxnRecord {
                scope: scope.clone(),
                status: Status::Active,
                requests: 0,
                writes: Vec::new(),
            },
        );
        trace!(txn = id, %scope, "open");

        Ok(MemoryTransaction {
            inner: Arc::new(TxnInner {
                shared: Arc::clone(&self.shared),
                id,
                mode: scope.mode(),
            }),
        })
    }
}

struct TxnInner {
    shared: Arc<Mutex<Shared>>,
    id: u64,
    mode: TransactionMode,
}

impl Drop for TxnInner {
    fn drop(&mut self) {
        // no handles left: nothing can issue requests, so it commits
        self.shared.lock().auto_commit(self.id);
    }
}

/// Transaction handle of a [`MemoryBackend`]
#[derive(Clone)]
pub struct MemoryTransaction {
    inner: Arc<TxnInner>,
}

impl fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .finish_non_exhaustive()
    }
}

impl MemoryTransaction {
    pub fn id(&self) -> u64 {
        self.inner.id
    }
}

impl TransactionHandle for MemoryTransaction {
    type Store = MemoryStore;

    fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    fn object_store(&self, name: &str) -> IdbResult<MemoryStore> {
        let shared = self.inner.shared.lock();
        let in_scope = shared
            .txns
            .get(&self.inner.id)
            .is_some_and(|r| r.scope.contains(name));
        if !in_scope {
            return Err(IdbError::not_found(format!(
                "object store '{name}' is not in the transaction scope"
            )));
        }
        Ok(MemoryStore {
            txn: Arc::clone(&self.inner),
            name: name.to_string(),
        })
    }

    fn commit(&self) {
        let mut shared = self.inner.shared.lock();
        let active = shared
            .txns
            .get(&self.inner.id)
            .is_some_and(|r| r.status == Status::Active);
        if !active {
            return;
        }
        if shared.trip(MemoryOp::Commit) {
            shared.finish(self.inner.id, Status::Aborted);
            shared.stats.aborts += 1;
            return;
        }
        shared.finish(self.inner.id, Status::Committed);
        shared.stats.commits += 1;
    }

    fn abort(&self) {
        let mut shared = self.inner.shared.lock();
        let active = shared
            .txns
            .get(&self.inner.id)
            .is_some_and(|r| r.status == Status::Active);
        if active {
            shared.finish(self.inner.id, Status::Aborted);
            shared.stats.aborts += 1;
        }
    }

    fn wait_complete(&self) -> IdbResult<()> {
        let mut shared = self.inner.shared.lock();
        // waiting yields, and a transaction with nothing to do commits
        shared.auto_commit(self.inner.id);
        match shared.txns.get(&self.inner.id).map(|r| r.status) {
            Some(Status::Committed) => Ok(()),
            _ => Err(IdbError::dom(
                DomErrorName::Abort,
                "The transaction was aborted.",
            )),
        }
    }
}

/// Object store handle of a [`MemoryBackend`]
pub struct MemoryStore {
    txn: Arc<TxnInner>,
    name: String,
}

impl MemoryStore {
    fn read<T>(
        &self,
        op: MemoryOp,
        f: impl FnOnce(&BTreeMap<Key, Value>) -> T,
    ) -> IdbResult<T> {
        let mut shared = self.txn.shared.lock();
        shared.admit(self.txn.id, op)?;
        let view = shared.view(self.txn.id, &self.name);
        Ok(f(&view))
    }

    fn write(&self, op: MemoryOp, key: Option<Key>, write: Write) -> IdbResult<()> {
        let mut shared = self.txn.shared.lock();
        shared.admit(self.txn.id, op)?;
        if !self.txn.mode.is_read_write() {
            return Err(IdbError::read_only("The transaction is read-only."));
        }
        if op == MemoryOp::Add {
            if let Some(key) = &key {
                if shared.view(self.txn.id, &self.name).contains_key(key) {
                    return Err(IdbError::constraint(
                        "Key already exists in the object store.",
                    ));
                }
            }
        }
        shared.record_write(self.txn.id, &self.name, op, key, write);
        Ok(())
    }

    fn required_key(key: Option<&Key>) -> IdbResult<Key> {
        let key = key.cloned().ok_or_else(|| {
            IdbError::data("The object store uses out-of-line keys and no key was provided.")
        })?;
        key.validate()?;
        Ok(key)
    }
}

impl StoreHandle for MemoryStore {
    type Cursor = MemoryCursor;

    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, value: &Value, key: Option<&Key>) -> IdbResult<()> {
        let key = Self::required_key(key)?;
        self.write(
            MemoryOp::Put,
            Some(key.clone()),
            Write::Put(key, value.clone()),
        )
    }

    fn add(&self, value: &Value, key: Option<&Key>) -> IdbResult<()> {
        let key = Self::required_key(key)?;
        self.write(
            MemoryOp::Add,
            Some(key.clone()),
            Write::Put(key, value.clone()),
        )
    }

    fn delete(&self, query: &Query) -> IdbResult<()> {
        self.write(MemoryOp::Delete, None, Write::Delete(query.clone()))
    }

    fn clear(&self) -> IdbResult<()> {
        self.write(MemoryOp::Clear, None, Write::Clear)
    }

    fn get(&self, query: &Query) -> IdbResult<Option<Value>> {
        self.read(MemoryOp::Get, |map| {
            select(map, query).next().map(|(_, v)| v.clone())
        })
    }

    fn get_key(&self, query: &Query) -> IdbResult<Option<Key>> {
        self.read(MemoryOp::GetKey, |map| {
            select(map, query).next().map(|(k, _)| k.clone())
        })
    }

    fn get_all(&self, query: &Query, count: Option<u32>) -> IdbResult<Vec<Value>> {
        let limit = count_limit(count);
        self.read(MemoryOp::GetAll, |map| {
            select(map, query).take(limit).map(|(_, v)| v.clone()).collect()
        })
    }

    fn get_all_keys(&self, query: &Query, count: Option<u32>) -> IdbResult<Vec<Key>> {
        let limit = count_limit(count);
        self.read(MemoryOp::GetAllKeys, |map| {
            select(map, query).take(limit).map(|(k, _)| k.clone()).collect()
        })
    }

    fn count(&self, query: &Query) -> IdbResult<u64> {
        self.read(MemoryOp::Count, |map| select(map, query).count() as u64)
    }

    fn open_cursor(&self, range: Option<&KeyRange>) -> IdbResult<MemoryCursor> {
        let query = Query::from(range.cloned());
        let entries = self.read(MemoryOp::OpenCursor, |map| {
            select(map, &query)
                .map(|(k, v)| CursorEntry {
                    key: k.clone(),
                    value: v.clone(),
                })
                .collect::<Vec<_>>()
        })?;
        Ok(MemoryCursor {
            txn: Arc::clone(&self.txn),
            entries: entries.into_iter(),
            requested: true,
            exhausted: false,
        })
    }
}

/// Cursor over a snapshot taken when it was opened
pub struct MemoryCursor {
    txn: Arc<TxnInner>,
    entries: std::vec::IntoIter<CursorEntry>,
    requested: bool,
    exhausted: bool,
}

impl CursorHandle for MemoryCursor {
    fn wait_next(&mut self) -> IdbResult<Option<CursorEntry>> {
        if self.exhausted {
            return Ok(None);
        }
        if !self.requested {
            return Err(IdbError::invalid_state(
                "The cursor is not waiting for a value.",
            ));
        }
        self.requested = false;
        let next = self.entries.next();
        if next.is_none() {
            self.exhausted = true;
        }
        Ok(next)
    }

    fn advance(&mut self) -> IdbResult<()> {
        if self.exhausted {
            return Ok(());
        }
        if self.requested {
            return Err(IdbError::invalid_state(
                "The cursor is already being iterated.",
            ));
        }
        self.txn
            .shared
            .lock()
            .admit(self.txn.id, MemoryOp::Advance)?;
        self.requested = true;
        Ok(())
    }
}
