//! Host cursor: one `continue` request in flight at a time

use crate::engine::{StoreOp, StoreReply};
use crate::transaction::HostObjectStore;
use otter_idb::{CursorEntry, CursorHandle, IdbError, IdbResult, Pending};

enum State {
    /// Answer already here (the open request carries the first entry)
    Ready(Option<CursorEntry>),
    Waiting(Pending<StoreReply>),
    Delivered,
    Exhausted,
}

/// Cursor over a [`HostObjectStore`]
pub struct HostCursor {
    store: HostObjectStore,
    id: u64,
    state: State,
}

impl std::fmt::Debug for HostCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Ready(_) => "ready",
            State::Waiting(_) => "waiting",
            State::Delivered => "delivered",
            State::Exhausted => "exhausted",
        };
        f.debug_struct("HostCursor")
            .field("id", &self.id)
            .field("state", &state)
            .finish()
    }
}

impl HostCursor {
    pub(crate) fn new(store: HostObjectStore, id: u64, first: Option<CursorEntry>) -> Self {
        Self {
            store,
            id,
            state: State::Ready(first),
        }
    }

    fn deliver(&mut self, entry: Option<CursorEntry>) -> Option<CursorEntry> {
        self.state = if entry.is_some() {
            State::Delivered
        } else {
            State::Exhausted
        };
        entry
    }
}

impl CursorHandle for HostCursor {
    fn wait_next(&mut self) -> IdbResult<Option<CursorEntry>> {
        match std::mem::replace(&mut self.state, State::Delivered) {
            State::Ready(entry) => Ok(self.deliver(entry)),
            State::Waiting(pending) => match pending.wait()? {
                StoreReply::Entry(entry) => Ok(self.deliver(entry)),
                other => Err(IdbError::Storage(format!(
                    "host answered continue with {other:?}"
                ))),
            },
            State::Delivered => Err(IdbError::invalid_state(
                "The cursor is waiting for advance to be called.",
            )),
            State::Exhausted => {
                self.state = State::Exhausted;
                Ok(None)
            }
        }
    }

    fn advance(&mut self) -> IdbResult<()> {
        match &self.state {
            State::Exhausted => Ok(()),
            State::Delivered => {
                let pending = self.store.send(StoreOp::Continue(self.id))?;
                self.state = State::Waiting(pending);
                Ok(())
            }
            State::Ready(_) | State::Waiting(_) => Err(IdbError::invalid_state(
                "The cursor is already advancing.",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AutoCommit, HostConfig, IndexedDb, ObjectStoreOptions};
    use otter_idb::{
        Backend, CancelToken, DomErrorName, Key, KeyRange, StoreHandle, TransactionHandle,
        TransactionScope, Value,
    };

    fn seeded_store() -> HostObjectStore {
        let idb = IndexedDb::new(HostConfig::new().auto_commit(AutoCommit::Never)).unwrap();
        let db = idb
            .open(
                "app",
                1,
                |upgrade, _, _| upgrade.create_object_store("kv", ObjectStoreOptions::new()),
                &CancelToken::never(),
            )
            .unwrap();
        let txn = db
            .open_transaction(&TransactionScope::read_write(["kv"]))
            .unwrap();
        let store = txn.object_store("kv").unwrap();
        for key in ["a", "b", "c", "d"] {
            store.put(&Value::from(key), Some(&Key::from(key))).unwrap();
        }
        store
    }

    #[test]
    fn test_walks_range_in_order() {
        let store = seeded_store();
        let range = KeyRange::bound("b", "d", false, true).unwrap();
        let mut cursor = store.open_cursor(Some(&range)).unwrap();

        let mut keys = Vec::new();
        while let Some(entry) = cursor.wait_next().unwrap() {
            keys.push(entry.key);
            cursor.advance().unwrap();
        }
        assert_eq!(keys, vec![Key::from("b"), Key::from("c")]);

        // exhausted cursors stay quiet
        cursor.advance().unwrap();
        assert_eq!(cursor.wait_next().unwrap(), None);
    }

    #[test]
    fn test_misuse_is_invalid_state() {
        let store = seeded_store();
        let mut cursor = store.open_cursor(None).unwrap();
        assert_eq!(
            cursor.advance().unwrap_err().dom_name(),
            Some(DomErrorName::InvalidState)
        );
        cursor.wait_next().unwrap();
        assert_eq!(
            cursor.wait_next().unwrap_err().dom_name(),
            Some(DomErrorName::InvalidState)
        );
    }

    #[test]
    fn test_continue_after_commit_is_inactive() {
        let store = seeded_store();
        let mut cursor = store.open_cursor(None).unwrap();
        cursor.wait_next().unwrap();
        store.transaction().commit();
        store.transaction().wait_complete().unwrap();

        cursor.advance().unwrap();
        assert!(cursor.wait_next().unwrap_err().is_transaction_inactive());
    }
}
