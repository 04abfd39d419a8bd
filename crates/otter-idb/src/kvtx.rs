//! Byte-oriented key-value transaction
//!
//! [`Kvtx`] stores raw byte values under raw byte keys in one object store of
//! a [`DurableTransaction`]. Writes are not visible outside the transaction
//! until [`Kvtx::commit`].
//!
//! ```no_run
//! use otter_idb::memory::MemoryBackend;
//! use otter_idb::{DurableTransaction, Kvtx, TransactionScope};
//!
//! # fn main() -> otter_idb::IdbResult<()> {
//! let backend = MemoryBackend::with_stores(["kv"]);
//! let txn = DurableTransaction::begin(backend, TransactionScope::read_write(["kv"]))?;
//! let kv = Kvtx::new(txn, "kv")?;
//! kv.set(b"key", b"test")?;
//! kv.commit()?;
//! assert_eq!(kv.get(b"key")?, Some(b"test".to_vec()));
//! # Ok(())
//! # }
//! ```

use crate::binding::{Backend, CursorEntry};
use crate::durable::{DurableObjectStore, DurableTransaction};
use crate::error::{IdbError, IdbResult};
use crate::key::{Key, KeyRange, Query, Value};
use std::fmt;

/// Key-value view over one durable object store
pub struct Kvtx<B: Backend> {
    txn: DurableTransaction<B>,
    store: DurableObjectStore<B>,
}

impl<B: Backend> fmt::Debug for Kvtx<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kvtx").field("store", &self.store).finish()
    }
}

impl<B: Backend> Clone for Kvtx<B> {
    fn clone(&self) -> Self {
        Self {
            txn: self.txn.clone(),
            store: self.store.clone(),
        }
    }
}

fn check_key(key: &[u8]) -> IdbResult<()> {
    if key.is_empty() {
        Err(IdbError::EmptyKey)
    } else {
        Ok(())
    }
}

fn key_bytes(key: Key) -> IdbResult<Vec<u8>> {
    key.into_binary()
}

impl<B: Backend> Kvtx<B> {
    /// Bind to `store`, which must be in the transaction's scope
    pub fn new(txn: DurableTransaction<B>, store: &str) -> IdbResult<Self> {
        let store = txn.object_store(store)?;
        Ok(Self { txn, store })
    }

    pub fn transaction(&self) -> &DurableTransaction<B> {
        &self.txn
    }

    pub fn store(&self) -> &DurableObjectStore<B> {
        &self.store
    }

    /// Number of keys in the store
    pub fn size(&self) -> IdbResult<u64> {
        self.store.count(Query::All)
    }

    /// Value stored under `key`, `None` if absent
    pub fn get(&self, key: &[u8]) -> IdbResult<Option<Vec<u8>>> {
        check_key(key)?;
        self.store
            .get(Key::from(key))?
            .map(Value::into_bytes)
            .transpose()
    }

    /// Store `value` under `key`. Not durable until commit.
    pub fn set(&self, key: &[u8], value: &[u8]) -> IdbResult<()> {
        check_key(key)?;
        self.store.put(value, Some(Key::from(key)))
    }

    /// Remove `key`. Removing a missing key is not an error.
    pub fn delete(&self, key: &[u8]) -> IdbResult<()> {
        check_key(key)?;
        self.store.delete(Key::from(key))
    }

    pub fn exists(&self, key: &[u8]) -> IdbResult<bool> {
        check_key(key)?;
        Ok(self.store.count(Key::from(key))? != 0)
    }

    /// Visit every entry whose key starts with `prefix`, in key order.
    ///
    /// The scanned range is `[prefix, prefix ++ 0xFF)`, so keys whose byte
    /// right after the prefix is `0xFF` are not visited. An empty prefix
    /// visits the whole store. The first visitor error stops the scan and is
    /// returned.
    pub fn scan_prefix<F, E>(&self, prefix: &[u8], mut visit: F) -> Result<(), E>
    where
        F: FnMut(&[u8], &[u8]) -> Result<(), E>,
        E: From<IdbError>,
    {
        self.scan(prefix, |entry| {
            let key = key_bytes(entry.key)?;
            let value = entry.value.into_bytes()?;
            visit(&key, &value)
        })
    }

    /// Visit every key starting with `prefix`, in key order
    pub fn scan_prefix_keys<F, E>(&self, prefix: &[u8], mut visit: F) -> Result<(), E>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
        E: From<IdbError>,
    {
        self.scan(prefix, |entry| {
            let key = key_bytes(entry.key)?;
            visit(&key)
        })
    }

    fn scan<F, E>(&self, prefix: &[u8], mut visit: F) -> Result<(), E>
    where
        F: FnMut(CursorEntry) -> Result<(), E>,
        E: From<IdbError>,
    {
        let mut cursor = self.store.open_cursor(KeyRange::prefix(prefix))?;
        while let Some(entry) = cursor.wait_next()? {
            visit(entry)?;
            cursor.advance()?;
        }
        Ok(())
    }

    /// Commit the transaction
    pub fn commit(&self) -> IdbResult<()> {
        self.txn.commit()
    }

    /// Abandon uncommitted writes. Safe to call any number of times.
    pub fn discard(&self) {
        self.txn.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::TransactionScope;
    use crate::memory::MemoryBackend;

    fn kvtx(backend: &MemoryBackend) -> Kvtx<MemoryBackend> {
        let txn =
            DurableTransaction::begin(backend.clone(), TransactionScope::read_write(["kv"]))
                .unwrap();
        Kvtx::new(txn, "kv").unwrap()
    }

    #[test]
    fn test_empty_key_rejected_without_io() {
        let backend = MemoryBackend::with_stores(["kv"]);
        let kv = kvtx(&backend);
        let before = backend.stats();

        assert!(matches!(kv.get(b""), Err(IdbError::EmptyKey)));
        assert!(matches!(kv.set(b"", b"v"), Err(IdbError::EmptyKey)));
        assert!(matches!(kv.delete(b""), Err(IdbError::EmptyKey)));
        assert!(matches!(kv.exists(b""), Err(IdbError::EmptyKey)));

        assert_eq!(backend.stats().requests, before.requests);
        assert_eq!(kv.transaction().pending_operations(), 0);
    }

    #[test]
    fn test_get_set_delete() {
        let backend = MemoryBackend::with_stores(["kv"]);
        let kv = kvtx(&backend);

        assert_eq!(kv.get(b"a").unwrap(), None);
        kv.set(b"a", b"1").unwrap();
        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(kv.exists(b"a").unwrap());
        assert_eq!(kv.size().unwrap(), 1);

        kv.delete(b"a").unwrap();
        kv.delete(b"missing").unwrap();
        assert!(!kv.exists(b"a").unwrap());
        assert_eq!(kv.size().unwrap(), 0);
    }

    #[test]
    fn test_get_non_bytes_value() {
        let backend = MemoryBackend::with_stores(["kv"]);
        let kv = kvtx(&backend);
        kv.store().put("text", Some(Key::from(b"k".as_slice()))).unwrap();
        assert!(matches!(
            kv.get(b"k"),
            Err(IdbError::UnexpectedValue {
                expected: "bytes",
                ..
            })
        ));
    }

    #[test]
    fn test_scan_stops_on_visitor_error() {
        let backend = MemoryBackend::with_stores(["kv"]);
        let kv = kvtx(&backend);
        for key in [b"p1", b"p2", b"p3"] {
            kv.set(key, b"v").unwrap();
        }

        #[derive(Debug)]
        enum ScanError {
            Stop,
            Idb(IdbError),
        }
        impl From<IdbError> for ScanError {
            fn from(err: IdbError) -> Self {
                ScanError::Idb(err)
            }
        }

        let mut seen = Vec::new();
        let result = kv.scan_prefix_keys(b"p", |key| {
            seen.push(key.to_vec());
            if seen.len() == 2 {
                Err(ScanError::Stop)
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(ScanError::Stop)));
        assert_eq!(seen, vec![b"p1".to_vec(), b"p2".to_vec()]);
    }

    #[test]
    fn test_set_while_inactive_is_queued() {
        let backend = MemoryBackend::with_stores(["kv"]);
        let kv = kvtx(&backend);
        backend.expire_all();

        kv.set(b"a", b"1").unwrap();
        assert_eq!(kv.transaction().pending_operations(), 1);
        assert_eq!(backend.dump("kv").len(), 0);

        kv.commit().unwrap();
        assert_eq!(backend.put_count("kv", &Key::from(b"a".as_slice())), 1);
        assert_eq!(kv.transaction().pending_operations(), 0);
    }

    #[test]
    fn test_discard_drops_uncommitted_writes() {
        let backend = MemoryBackend::with_stores(["kv"]);
        let kv = kvtx(&backend);
        kv.set(b"a", b"1").unwrap();
        kv.discard();
        kv.discard();

        let fresh = kvtx(&backend);
        assert_eq!(fresh.get(b"a").unwrap(), None);
    }
}
