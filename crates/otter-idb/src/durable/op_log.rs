//! Write-ahead log of mutations awaiting a live transaction

use crate::binding::StoreHandle;
use crate::error::IdbResult;
use crate::key::{Key, Query, Value};
use std::collections::VecDeque;

/// A store mutation with every argument captured when it was issued
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Put { value: Value, key: Option<Key> },
    Add { value: Value, key: Option<Key> },
    Delete(Query),
    Clear,
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::Put { .. } => "put",
            Mutation::Add { .. } => "add",
            Mutation::Delete(_) => "delete",
            Mutation::Clear => "clear",
        }
    }

    /// Issue the mutation against a live store handle
    pub fn apply<S: StoreHandle>(&self, store: &S) -> IdbResult<()> {
        match self {
            Mutation::Put { value, key } => store.put(value, key.as_ref()),
            Mutation::Add { value, key } => store.add(value, key.as_ref()),
            Mutation::Delete(query) => store.delete(query),
            Mutation::Clear => store.clear(),
        }
    }
}

/// A queued mutation
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    pub seq: u64,
    pub mutation: Mutation,
}

/// Ordered queue of mutations for one object store
#[derive(Debug, Default)]
pub struct OpLog {
    ops: VecDeque<PendingOperation>,
    next_seq: u64,
}

impl OpLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mutation, returning its sequence number
    pub fn push(&mut self, mutation: Mutation) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ops.push_back(PendingOperation { seq, mutation });
        seq
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingOperation> {
        self.ops.iter()
    }

    /// Apply queued mutations front to back.
    ///
    /// Each applied mutation leaves the log immediately. The first failure
    /// stops the replay with that mutation still at the front.
    pub fn replay<S: StoreHandle>(&mut self, store: &S) -> IdbResult<usize> {
        let mut applied = 0;
        while let Some(op) = self.ops.front() {
            op.mutation
                .apply(store)
                .map_err(|err| err.context(op.mutation.name(), store.name()))?;
            tracing::trace!(
                store = store.name(),
                seq = op.seq,
                op = op.mutation.name(),
                "replayed"
            );
            self.ops.pop_front();
            applied += 1;
        }
        Ok(applied)
    }
}
