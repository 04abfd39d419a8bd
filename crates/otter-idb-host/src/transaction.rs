//! Transaction and object store handles of the host

use crate::cursor::HostCursor;
use crate::database::HostInner;
use crate::engine::{StoreOp, StoreReply};
use crate::event_loop::Job;
use otter_idb::{
    IdbError, IdbResult, Key, KeyRange, Query, StoreHandle, TransactionHandle, TransactionMode,
    TransactionScope, Value,
};
use std::sync::Arc;

struct TxnShared {
    host: Arc<HostInner>,
    id: u64,
    scope: TransactionScope,
}

impl Drop for TxnShared {
    fn drop(&mut self) {
        let _ = self.host.send(Job::Release { txn: self.id });
    }
}

/// A transaction on the host thread.
///
/// The host commits it on its own once it idles (or exhausts its request
/// budget); every request after that fails with `TransactionInactiveError`.
#[derive(Clone)]
pub struct HostTransaction {
    shared: Arc<TxnShared>,
}

impl std::fmt::Debug for HostTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostTransaction")
            .field("id", &self.shared.id)
            .field("scope", &self.shared.scope)
            .finish()
    }
}

impl HostTransaction {
    pub(crate) fn new(host: Arc<HostInner>, id: u64, scope: TransactionScope) -> Self {
        Self {
            shared: Arc::new(TxnShared { host, id, scope }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn scope(&self) -> &TransactionScope {
        &self.shared.scope
    }
}

impl TransactionHandle for HostTransaction {
    type Store = HostObjectStore;

    fn mode(&self) -> TransactionMode {
        self.shared.scope.mode()
    }

    fn object_store(&self, name: &str) -> IdbResult<HostObjectStore> {
        if !self.shared.scope.contains(name) {
            return Err(IdbError::not_found(format!(
                "The object store '{name}' is not in this transaction's scope."
            )));
        }
        Ok(HostObjectStore {
            txn: self.clone(),
            name: name.to_string(),
        })
    }

    fn commit(&self) {
        let _ = self.shared.host.send(Job::Commit {
            txn: self.shared.id,
        });
    }

    fn abort(&self) {
        let _ = self.shared.host.send(Job::Abort {
            txn: self.shared.id,
        });
    }

    fn wait_complete(&self) -> IdbResult<()> {
        self.shared.host.call(|reply| Job::WaitComplete {
            txn: self.shared.id,
            reply,
        })
    }
}

/// An object store inside a [`HostTransaction`]
#[derive(Debug, Clone)]
pub struct HostObjectStore {
    txn: HostTransaction,
    name: String,
}

fn unexpected(op: &'static str, reply: StoreReply) -> IdbError {
    IdbError::Storage(format!("host answered {op} with {reply:?}"))
}

impl HostObjectStore {
    pub fn transaction(&self) -> &HostTransaction {
        &self.txn
    }

    pub(crate) fn call(&self, op: StoreOp) -> IdbResult<StoreReply> {
        let shared = &self.txn.shared;
        shared.host.call(|reply| Job::Store {
            txn: shared.id,
            store: self.name.clone(),
            op,
            reply,
        })
    }

    /// Queue a request without waiting for its answer
    pub(crate) fn send(&self, op: StoreOp) -> IdbResult<otter_idb::Pending<StoreReply>> {
        let shared = &self.txn.shared;
        let (reply, pending) = otter_idb::request();
        shared.host.send(Job::Store {
            txn: shared.id,
            store: self.name.clone(),
            op,
            reply,
        })?;
        Ok(pending)
    }

    fn call_done(&self, op: StoreOp) -> IdbResult<()> {
        match self.call(op)? {
            StoreReply::Done => Ok(()),
            other => Err(unexpected("write", other)),
        }
    }
}

impl StoreHandle for HostObjectStore {
    type Cursor = HostCursor;

    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, value: &Value, key: Option<&Key>) -> IdbResult<()> {
        self.call_done(StoreOp::Put {
            value: value.clone(),
            key: key.cloned(),
        })
    }

    fn add(&self, value: &Value, key: Option<&Key>) -> IdbResult<()> {
        self.call_done(StoreOp::Add {
            value: value.clone(),
            key: key.cloned(),
        })
    }

    fn delete(&self, query: &Query) -> IdbResult<()> {
        self.call_done(StoreOp::Delete(query.clone()))
    }

    fn clear(&self) -> IdbResult<()> {
        self.call_done(StoreOp::Clear)
    }

    fn get(&self, query: &Query) -> IdbResult<Option<Value>> {
        match self.call(StoreOp::Get(query.clone()))? {
            StoreReply::Value(value) => Ok(value),
            other => Err(unexpected("get", other)),
        }
    }

    fn get_key(&self, query: &Query) -> IdbResult<Option<Key>> {
        match self.call(StoreOp::GetKey(query.clone()))? {
            StoreReply::Key(key) => Ok(key),
            other => Err(unexpected("getKey", other)),
        }
    }

    fn get_all(&self, query: &Query, count: Option<u32>) -> IdbResult<Vec<Value>> {
        match self.call(StoreOp::GetAll(query.clone(), count))? {
            StoreReply::Values(values) => Ok(values),
            other => Err(unexpected("getAll", other)),
        }
    }

    fn get_all_keys(&self, query: &Query, count: Option<u32>) -> IdbResult<Vec<Key>> {
        match self.call(StoreOp::GetAllKeys(query.clone(), count))? {
            StoreReply::Keys(keys) => Ok(keys),
            other => Err(unexpected("getAllKeys", other)),
        }
    }

    fn count(&self, query: &Query) -> IdbResult<u64> {
        match self.call(StoreOp::Count(query.clone()))? {
            StoreReply::Count(n) => Ok(n),
            other => Err(unexpected("count", other)),
        }
    }

    fn open_cursor(&self, range: Option<&KeyRange>) -> IdbResult<HostCursor> {
        match self.call(StoreOp::OpenCursor(range.cloned()))? {
            StoreReply::Cursor { id, entry } => Ok(HostCursor::new(self.clone(), id, entry)),
            other => Err(unexpected("openCursor", other)),
        }
    }
}
