use super::cursor::DurableCursor;
use super::op_log::Mutation;
use super::transaction::DurableTransaction;
use super::CursorOf;
use crate::binding::{Backend, StoreHandle};
use crate::error::IdbResult;
use crate::key::{Key, KeyRange, Query, Value};
use std::fmt;

/// One object store inside a [`DurableTransaction`].
///
/// Mutations are applied immediately while the backing transaction is live
/// and queued otherwise. Reads restart the transaction when needed, so they
/// always observe every earlier mutation of the same transaction.
pub struct DurableObjectStore<B: Backend> {
    txn: DurableTransaction<B>,
    slot: usize,
    name: String,
}

impl<B: Backend> Clone for DurableObjectStore<B> {
    fn clone(&self) -> Self {
        Self {
            txn: self.txn.clone(),
            slot: self.slot,
            name: self.name.clone(),
        }
    }
}

impl<B: Backend> fmt::Debug for DurableObjectStore<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableObjectStore")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> DurableObjectStore<B> {
    pub(crate) fn new(txn: DurableTransaction<B>, slot: usize, name: String) -> Self {
        Self { txn, slot, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning transaction
    pub fn transaction(&self) -> &DurableTransaction<B> {
        &self.txn
    }

    pub fn put(&self, value: impl Into<Value>, key: Option<Key>) -> IdbResult<()> {
        if let Some(key) = &key {
            key.validate()?;
        }
        self.txn.submit(
            self.slot,
            Mutation::Put {
                value: value.into(),
                key,
            },
        )
    }

    /// Insert-only put; a duplicate key is rejected by the backing store
    pub fn add(&self, value: impl Into<Value>, key: Option<Key>) -> IdbResult<()> {
        if let Some(key) = &key {
            key.validate()?;
        }
        self.txn.submit(
            self.slot,
            Mutation::Add {
                value: value.into(),
                key,
            },
        )
    }

    pub fn delete(&self, query: impl Into<Query>) -> IdbResult<()> {
        let query = query.into();
        query.validate()?;
        self.txn.submit(self.slot, Mutation::Delete(query))
    }

    pub fn clear(&self) -> IdbResult<()> {
        self.txn.submit(self.slot, Mutation::Clear)
    }

    pub fn get(&self, query: impl Into<Query>) -> IdbResult<Option<Value>> {
        let query = query.into();
        query.validate()?;
        self.txn.read(self.slot, "get", |store| store.get(&query))
    }

    pub fn get_key(&self, query: impl Into<Query>) -> IdbResult<Option<Key>> {
        let query = query.into();
        query.validate()?;
        self.txn.read(self.slot, "get_key", |store| store.get_key(&query))
    }

    pub fn get_all(&self, query: impl Into<Query>, count: Option<u32>) -> IdbResult<Vec<Value>> {
        let query = query.into();
        query.validate()?;
        self.txn
            .read(self.slot, "get_all", |store| store.get_all(&query, count))
    }

    pub fn get_all_keys(
        &self,
        query: impl Into<Query>,
        count: Option<u32>,
    ) -> IdbResult<Vec<Key>> {
        let query = query.into();
        query.validate()?;
        self.txn.read(self.slot, "get_all_keys", |store| {
            store.get_all_keys(&query, count)
        })
    }

    pub fn count(&self, query: impl Into<Query>) -> IdbResult<u64> {
        let query = query.into();
        query.validate()?;
        self.txn.read(self.slot, "count", |store| store.count(&query))
    }

    /// Cursor over `range`, or the whole store when `None`
    pub fn open_cursor(&self, range: Option<KeyRange>) -> IdbResult<DurableCursor<B>> {
        DurableCursor::open(self.clone(), range)
    }

    pub(crate) fn open_backend_cursor(
        &self,
        range: Option<&KeyRange>,
    ) -> IdbResult<(u64, CursorOf<B>)> {
        self.txn
            .read_tracked(self.slot, "open_cursor", |store| store.open_cursor(range))
    }

    pub(crate) fn mark_inactive(&self, generation: u64) {
        self.txn.mark_inactive(generation);
    }
}
