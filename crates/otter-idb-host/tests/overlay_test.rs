//! Property tests for the host's transaction overlay

use otter_idb::{
    Backend, CancelToken, Key, KeyRange, Query, StoreHandle, TransactionHandle, TransactionScope,
    Value,
};
use otter_idb_host::{AutoCommit, Database, HostConfig, IndexedDb, ObjectStoreOptions};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Op {
    Put(u8, u8),
    Delete(u8),
    DeleteRange(u8, u8),
    Clear,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0u8..16, any::<u8>()).prop_map(|(k, v)| Op::Put(k, v)),
        2 => (0u8..16).prop_map(Op::Delete),
        1 => (0u8..16, 0u8..16).prop_map(|(a, b)| Op::DeleteRange(a.min(b), a.max(b))),
        1 => Just(Op::Clear),
    ]
}

fn database() -> Database {
    let idb = IndexedDb::new(HostConfig::new().auto_commit(AutoCommit::Never)).unwrap();
    idb.open(
        "prop",
        1,
        |upgrade, _, _| upgrade.create_object_store("kv", ObjectStoreOptions::new()),
        &CancelToken::never(),
    )
    .unwrap()
}

fn key(k: u8) -> Key {
    Key::Binary(vec![k])
}

fn contents(db: &Database) -> BTreeMap<u8, u8> {
    let txn = db
        .open_transaction(&TransactionScope::read_only(["kv"]))
        .unwrap();
    let store = txn.object_store("kv").unwrap();
    let keys = store.get_all_keys(&Query::All, None).unwrap();
    let values = store.get_all(&Query::All, None).unwrap();
    keys.into_iter()
        .zip(values)
        .map(|(k, v)| (k.into_binary().unwrap()[0], v.into_bytes().unwrap()[0]))
        .collect()
}

proptest! {
    #[test]
    fn prop_overlay_matches_model(
        seed in proptest::collection::btree_map(0u8..16, any::<u8>(), 0..8),
        ops in proptest::collection::vec(op(), 0..24),
        commit in any::<bool>(),
    ) {
        let db = database();
        let writer = db.open_transaction(&TransactionScope::read_write(["kv"])).unwrap();
        let store = writer.object_store("kv").unwrap();
        for (k, v) in &seed {
            store.put(&Value::Bytes(vec![*v]), Some(&key(*k))).unwrap();
        }
        writer.commit();
        writer.wait_complete().unwrap();

        let txn = db.open_transaction(&TransactionScope::read_write(["kv"])).unwrap();
        let store = txn.object_store("kv").unwrap();
        let mut model = seed.clone();
        for op in &ops {
            match op {
                Op::Put(k, v) => {
                    store.put(&Value::Bytes(vec![*v]), Some(&key(*k))).unwrap();
                    model.insert(*k, *v);
                }
                Op::Delete(k) => {
                    store.delete(&Query::Key(key(*k))).unwrap();
                    model.remove(k);
                }
                Op::DeleteRange(a, b) => {
                    let range = KeyRange::bound(key(*a), key(*b), false, false).unwrap();
                    store.delete(&Query::Range(range)).unwrap();
                    model.retain(|k, _| k < a || k > b);
                }
                Op::Clear => {
                    store.clear().unwrap();
                    model.clear();
                }
            }
            prop_assert_eq!(store.count(&Query::All).unwrap(), model.len() as u64);
        }

        if commit {
            txn.commit();
            txn.wait_complete().unwrap();
            prop_assert_eq!(contents(&db), model);
        } else {
            txn.abort();
            prop_assert!(txn.wait_complete().is_err());
            prop_assert_eq!(contents(&db), seed);
        }
    }
}
