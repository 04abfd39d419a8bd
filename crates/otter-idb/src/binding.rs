//! Backing store binding contract
//!
//! These traits describe the IndexedDB-shaped collaborator the durable layer
//! sits on. Every request blocks until the store signals completion. A
//! transaction handle may become inactive at any moment; requests against it
//! then fail with an error that [`crate::is_transaction_inactive`] recognizes.

use crate::error::{IdbError, IdbResult};
use crate::key::{Key, KeyRange, Query, Value};
use crate::request::CancelToken;
use std::fmt;
use std::str::FromStr;

/// Transaction access level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionMode {
    #[default]
    ReadOnly,
    ReadWrite,
}

impl TransactionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionMode::ReadOnly => "readonly",
            TransactionMode::ReadWrite => "readwrite",
        }
    }

    pub fn is_read_write(&self) -> bool {
        matches!(self, TransactionMode::ReadWrite)
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionMode {
    type Err = IdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readonly" => Ok(TransactionMode::ReadOnly),
            "readwrite" => Ok(TransactionMode::ReadWrite),
            other => Err(IdbError::data(format!("unknown transaction mode '{other}'"))),
        }
    }
}

/// The object stores a transaction may touch and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionScope {
    stores: Vec<String>,
    mode: TransactionMode,
}

impl TransactionScope {
    pub fn new<I, S>(stores: I, mode: TransactionMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut stores: Vec<String> = stores.into_iter().map(Into::into).collect();
        stores.sort();
        stores.dedup();
        Self { stores, mode }
    }

    pub fn read_only<I, S>(stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(stores, TransactionMode::ReadOnly)
    }

    pub fn read_write<I, S>(stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(stores, TransactionMode::ReadWrite)
    }

    pub fn stores(&self) -> &[String] {
        &self.stores
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn contains(&self, store: &str) -> bool {
        self.stores.iter().any(|s| s == store)
    }

    pub(crate) fn with_mode(mut self, mode: TransactionMode) -> Self {
        self.mode = mode;
        self
    }
}

impl fmt::Display for TransactionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ({})", self.stores.join(", "), self.mode)
    }
}

/// One key/value pair produced by a cursor
#[derive(Debug, Clone, PartialEq)]
pub struct CursorEntry {
    pub key: Key,
    pub value: Value,
}

/// A database connection able to start transactions
pub trait Backend {
    type Transaction: TransactionHandle;

    /// Start a transaction over `scope`
    fn open_transaction(&self, scope: &TransactionScope) -> IdbResult<Self::Transaction>;

    /// Start a transaction, giving up if `cancel` fires first
    fn open_transaction_cancellable(
        &self,
        scope: &TransactionScope,
        cancel: &CancelToken,
    ) -> IdbResult<Self::Transaction> {
        cancel.check()?;
        self.open_transaction(scope)
    }
}

/// A live or formerly live backing transaction
pub trait TransactionHandle {
    type Store: StoreHandle;

    fn mode(&self) -> TransactionMode;

    /// Handle to one object store in the transaction's scope
    fn object_store(&self, name: &str) -> IdbResult<Self::Store>;

    /// Request commit. Fire-and-forget; observe the outcome with
    /// [`TransactionHandle::wait_complete`].
    fn commit(&self);

    /// Request abort. Fire-and-forget; failures (e.g. the transaction has
    /// already finished) are discarded.
    fn abort(&self);

    /// Block until the transaction has finished and report how it ended
    fn wait_complete(&self) -> IdbResult<()>;
}

/// An object store bound to one backing transaction
pub trait StoreHandle {
    type Cursor: CursorHandle;

    fn name(&self) -> &str;

    fn put(&self, value: &Value, key: Option<&Key>) -> IdbResult<()>;

    /// Insert-only put. Uniqueness is enforced by the backing store.
    fn add(&self, value: &Value, key: Option<&Key>) -> IdbResult<()>;

    fn delete(&self, query: &Query) -> IdbResult<()>;

    fn clear(&self) -> IdbResult<()>;

    fn get(&self, query: &Query) -> IdbResult<Option<Value>>;

    fn get_key(&self, query: &Query) -> IdbResult<Option<Key>>;

    /// Values in key order, at most `count` of them. `None` and `Some(0)`
    /// both mean no limit.
    fn get_all(&self, query: &Query, count: Option<u32>) -> IdbResult<Vec<Value>>;

    fn get_all_keys(&self, query: &Query, count: Option<u32>) -> IdbResult<Vec<Key>>;

    fn count(&self, query: &Query) -> IdbResult<u64>;

    /// Open a cursor over `range` (everything when `None`). The first entry
    /// is requested immediately.
    fn open_cursor(&self, range: Option<&KeyRange>) -> IdbResult<Self::Cursor>;
}

/// Number of records a `get_all`/`get_all_keys` count allows
pub fn count_limit(count: Option<u32>) -> usize {
    match count {
        None | Some(0) => usize::MAX,
        Some(count) => count as usize,
    }
}

/// Pull-driven cursor: wait for a value, then explicitly ask for the next one
pub trait CursorHandle {
    /// Wait for the requested entry; `None` once the cursor is exhausted.
    fn wait_next(&mut self) -> IdbResult<Option<CursorEntry>>;

    /// Request the next entry. A no-op after exhaustion.
    fn advance(&mut self) -> IdbResult<()>;
}
