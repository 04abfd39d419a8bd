//! Integration tests for durable transactions over the memory backend

use otter_idb::memory::{MemoryBackend, MemoryOp};
use otter_idb::{
    DomErrorName, DurableConfig, DurableTransaction, IdbError, Key, KeyRange, Kvtx, Query,
    TransactionScope, Value,
};

fn key(bytes: &[u8]) -> Key {
    Key::from(bytes)
}

fn begin(backend: &MemoryBackend) -> DurableTransaction<MemoryBackend> {
    DurableTransaction::begin(backend.clone(), TransactionScope::read_write(["kv"])).unwrap()
}

fn committed(backend: &MemoryBackend) -> Vec<(Vec<u8>, Vec<u8>)> {
    backend
        .dump("kv")
        .into_iter()
        .map(|(k, v)| (k.into_binary().unwrap(), v.into_bytes().unwrap()))
        .collect()
}

#[test]
fn test_set_commit_get_scan() {
    let backend = MemoryBackend::with_stores(["kv"]);
    let kv = Kvtx::new(begin(&backend), "kv").unwrap();

    kv.set(b"key", b"test").unwrap();
    kv.commit().unwrap();
    assert_eq!(kv.get(b"key").unwrap(), Some(b"test".to_vec()));

    let mut visits = Vec::new();
    kv.scan_prefix(b"ke", |k, v| {
        visits.push((k.to_vec(), v.to_vec()));
        Ok::<_, IdbError>(())
    })
    .unwrap();
    assert_eq!(visits, vec![(b"key".to_vec(), b"test".to_vec())]);

    let mut cursor = kv.store().open_cursor(KeyRange::prefix(b"ke")).unwrap();
    assert!(cursor.wait_next().unwrap().is_some());
    cursor.advance().unwrap();
    assert_eq!(cursor.wait_next().unwrap(), None);
    cursor.advance().unwrap();
    assert_eq!(cursor.wait_next().unwrap(), None);
    assert!(cursor.is_exhausted());
}

#[test]
fn test_inactive_put_is_queued_and_applied_once() {
    let backend = MemoryBackend::with_stores(["kv"]);
    let kv = Kvtx::new(begin(&backend), "kv").unwrap();
    backend.fail_on(MemoryOp::Put, 2);

    kv.set(b"a", &[1]).unwrap();
    kv.set(b"b", &[2]).unwrap();
    assert_eq!(kv.transaction().pending_operations(), 1);
    assert!(!kv.transaction().is_live());

    kv.commit().unwrap();
    assert_eq!(
        committed(&backend),
        vec![(b"a".to_vec(), vec![1]), (b"b".to_vec(), vec![2])]
    );
    assert_eq!(backend.put_count("kv", &key(b"a")), 1);
    assert_eq!(backend.put_count("kv", &key(b"b")), 1);
    assert_eq!(kv.transaction().pending_operations(), 0);
}

#[test]
fn test_queued_mutations_replay_in_call_order() {
    let backend = MemoryBackend::with_stores(["kv"]);
    let kv = Kvtx::new(begin(&backend), "kv").unwrap();
    backend.expire_all();

    kv.set(b"a", b"1").unwrap();
    kv.delete(b"a").unwrap();
    kv.set(b"a", b"2").unwrap();
    kv.set(b"b", b"3").unwrap();
    assert_eq!(kv.transaction().pending_operations(), 4);
    assert!(backend.dump("kv").is_empty());

    // a read restarts and replays first
    assert_eq!(kv.get(b"a").unwrap(), Some(b"2".to_vec()));
    assert_eq!(kv.transaction().pending_operations(), 0);

    kv.commit().unwrap();
    assert_eq!(
        committed(&backend),
        vec![(b"a".to_vec(), b"2".to_vec()), (b"b".to_vec(), b"3".to_vec())]
    );
}

#[test]
fn test_restart_replays_sibling_stores() {
    let backend = MemoryBackend::with_stores(["kv", "meta"]);
    let txn =
        DurableTransaction::begin(backend.clone(), TransactionScope::read_write(["kv", "meta"]))
            .unwrap();
    let kv = Kvtx::new(txn.clone(), "kv").unwrap();
    let meta = Kvtx::new(txn.clone(), "meta").unwrap();
    backend.expire_all();

    meta.set(b"version", b"1").unwrap();
    kv.set(b"a", b"x").unwrap();
    assert_eq!(txn.pending_operations(), 2);

    assert_eq!(kv.size().unwrap(), 1);
    assert_eq!(txn.pending_operations(), 0);
    assert_eq!(meta.get(b"version").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn test_replay_failure_names_failing_mutation() {
    let backend = MemoryBackend::with_stores(["kv", "meta"]);
    backend.insert_committed("meta", key(b"version"), b"1".as_slice());
    let txn =
        DurableTransaction::begin(backend.clone(), TransactionScope::read_write(["kv", "meta"]))
            .unwrap();
    let kv = Kvtx::new(txn.clone(), "kv").unwrap();
    let meta = txn.object_store("meta").unwrap();
    backend.expire_all();

    kv.set(b"a", b"x").unwrap();
    meta.add(b"2".as_slice(), Some(key(b"version"))).unwrap();
    assert_eq!(txn.pending_operations(), 2);

    let err = kv.get(b"a").unwrap_err();
    match &err {
        IdbError::Operation {
            operation, target, ..
        } => {
            assert_eq!(*operation, "add");
            assert_eq!(target, "meta");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.dom_name(), Some(DomErrorName::Constraint));
    assert!(!err.is_transaction_inactive());
}

#[test]
fn test_partial_replay_keeps_remaining_ops() {
    let backend = MemoryBackend::with_stores(["kv"]);
    let kv = Kvtx::new(begin(&backend), "kv").unwrap();
    backend.set_request_budget(Some(2));
    backend.expire_all();

    for i in 0u8..5 {
        kv.set(&[b'k', i], &[i]).unwrap();
    }
    assert_eq!(kv.transaction().pending_operations(), 5);

    kv.commit().unwrap();
    assert_eq!(committed(&backend).len(), 5);
    for i in 0u8..5 {
        assert_eq!(backend.put_count("kv", &key(&[b'k', i])), 1);
    }
    assert_eq!(backend.applied().len(), 5);
}

#[test]
fn test_commit_gives_up_after_max_attempts() {
    let backend = MemoryBackend::with_stores(["kv"]);
    let kv = Kvtx::new(begin(&backend), "kv").unwrap();
    backend.fail_always(MemoryOp::Put);
    backend.expire_all();

    kv.set(b"a", b"1").unwrap();
    let opens_before = backend.stats().opens;

    let err = kv.commit().unwrap_err();
    assert!(matches!(err, IdbError::RestartExhausted { attempts: 10, .. }));
    assert!(
        err.to_string()
            .contains("unable to restart transaction without it going inactive")
    );
    assert!(!err.is_transaction_inactive());
    assert_eq!(backend.stats().opens - opens_before, 10);

    assert!(kv.transaction().is_failed());
    assert!(matches!(kv.get(b"a"), Err(IdbError::TransactionFailed)));
    assert!(matches!(kv.set(b"a", b"2"), Err(IdbError::TransactionFailed)));
    assert!(matches!(kv.commit(), Err(IdbError::TransactionFailed)));
    kv.discard();
    assert!(kv.transaction().is_failed());
}

#[test]
fn test_commit_respects_configured_attempts() {
    let backend = MemoryBackend::with_stores(["kv"]);
    let txn = DurableTransaction::begin_with_config(
        backend.clone(),
        TransactionScope::read_write(["kv"]),
        DurableConfig::new().with_max_attempts(3),
    )
    .unwrap();
    let kv = Kvtx::new(txn, "kv").unwrap();
    backend.fail_always(MemoryOp::Open);
    backend.expire_all();

    kv.set(b"a", b"1").unwrap();
    assert!(matches!(
        kv.commit(),
        Err(IdbError::RestartExhausted { attempts: 3, .. })
    ));
    assert_eq!(backend.calls(MemoryOp::Open), 4);
}

#[test]
fn test_read_retry_exhaustion_leaves_transaction_usable() {
    let backend = MemoryBackend::with_stores(["kv"]);
    let kv = Kvtx::new(begin(&backend), "kv").unwrap();
    backend.fail_always(MemoryOp::Get);

    let err = kv.get(b"a").unwrap_err();
    match &err {
        IdbError::RetryExhausted {
            operation,
            target,
            attempts,
            last,
        } => {
            assert_eq!(*operation, "get");
            assert_eq!(target, "kv");
            assert_eq!(*attempts, 10);
            assert!(last.is_transaction_inactive());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(backend.calls(MemoryOp::Get), 10);
    assert!(!kv.transaction().is_failed());

    backend.clear_faults();
    assert_eq!(kv.get(b"a").unwrap(), None);
}

#[test]
fn test_application_errors_propagate_without_retry() {
    let backend = MemoryBackend::with_stores(["kv"]);
    backend.insert_committed("kv", key(b"a"), b"old".as_slice());
    let txn = begin(&backend);
    let store = txn.object_store("kv").unwrap();

    let err = store.add(b"new".as_slice(), Some(key(b"a"))).unwrap_err();
    assert_eq!(err.dom_name(), Some(DomErrorName::Constraint));
    assert!(matches!(err, IdbError::Operation { operation: "add", .. }));
    assert_eq!(txn.pending_operations(), 0);
    assert_eq!(backend.calls(MemoryOp::Add), 1);

    let err = store.get(Key::Number(f64::NAN)).unwrap_err();
    assert_eq!(err.dom_name(), Some(DomErrorName::Data));
}

#[test]
fn test_abort_discards_live_and_queued_writes() {
    let backend = MemoryBackend::with_stores(["kv"]);
    let kv = Kvtx::new(begin(&backend), "kv").unwrap();

    kv.set(b"a", b"1").unwrap();
    kv.discard();
    assert_eq!(backend.stats().aborts, 1);

    kv.set(b"b", b"2").unwrap();
    assert_eq!(kv.transaction().pending_operations(), 1);
    kv.discard();
    kv.discard();
    assert_eq!(kv.transaction().pending_operations(), 0);
    assert_eq!(backend.stats().aborts, 1);

    kv.commit().unwrap();
    assert!(backend.dump("kv").is_empty());

    kv.set(b"c", b"3").unwrap();
    kv.commit().unwrap();
    assert_eq!(committed(&backend), vec![(b"c".to_vec(), b"3".to_vec())]);
}

#[test]
fn test_read_only_rejects_mutations() {
    let backend = MemoryBackend::with_stores(["kv"]);
    let txn =
        DurableTransaction::begin(backend.clone(), TransactionScope::read_only(["kv"])).unwrap();
    let store = txn.object_store("kv").unwrap();
    let requests = backend.stats().requests;

    let err = store.put(b"v".as_slice(), Some(key(b"a"))).unwrap_err();
    assert_eq!(err.dom_name(), Some(DomErrorName::ReadOnly));
    assert!(store.clear().is_err());
    assert_eq!(txn.pending_operations(), 0);
    assert_eq!(backend.stats().requests, requests);
    assert_eq!(store.count(Query::All).unwrap(), 0);
}

#[test]
fn test_object_store_outside_scope() {
    let backend = MemoryBackend::with_stores(["kv", "other"]);
    let txn = begin(&backend);
    let before = backend.stats();

    let err = txn.object_store("other").unwrap_err();
    assert_eq!(err.dom_name(), Some(DomErrorName::NotFound));
    assert_eq!(backend.stats(), before);

    let first = txn.object_store("kv").unwrap();
    let second = txn.object_store("kv").unwrap();
    first.put(b"v".as_slice(), Some(key(b"a"))).unwrap();
    assert_eq!(second.count(Query::All).unwrap(), 1);
}

#[test]
fn test_commit_failure_marks_failed() {
    let backend = MemoryBackend::with_stores(["kv"]);
    let kv = Kvtx::new(begin(&backend), "kv").unwrap();
    backend.fail_on(MemoryOp::Commit, 1);

    kv.set(b"a", b"1").unwrap();
    let err = kv.commit().unwrap_err();
    assert_eq!(err.dom_name(), Some(DomErrorName::Abort));
    assert!(kv.transaction().is_failed());
    assert!(backend.dump("kv").is_empty());
}

#[test]
fn test_cursor_resumes_after_transaction_goes_inactive() {
    let backend = MemoryBackend::with_stores(["kv"]);
    for k in [b"a", b"b", b"c", b"d", b"e"] {
        backend.insert_committed("kv", key(k), k.as_slice());
    }
    let txn =
        DurableTransaction::begin(backend.clone(), TransactionScope::read_only(["kv"])).unwrap();
    let store = txn.object_store("kv").unwrap();
    let mut cursor = store.open_cursor(None).unwrap();

    let mut seen = Vec::new();
    while let Some(entry) = cursor.wait_next().unwrap() {
        seen.push(entry.key.into_binary().unwrap());
        match seen.len() {
            1 => backend.fail_on(MemoryOp::Advance, 1),
            3 => backend.expire_all(),
            _ => {}
        }
        cursor.advance().unwrap();
    }

    assert_eq!(
        seen,
        vec![
            b"a".to_vec(),
            b"b".to_vec(),
            b"c".to_vec(),
            b"d".to_vec(),
            b"e".to_vec()
        ]
    );
    assert_eq!(backend.stats().opens, 3);
}

#[test]
fn test_cursor_resume_within_bounded_range() {
    let backend = MemoryBackend::with_stores(["kv"]);
    for k in [b"p1", b"p2", b"p3", b"q1"] {
        backend.insert_committed("kv", key(k), k.as_slice());
    }
    let txn = begin(&backend);
    let store = txn.object_store("kv").unwrap();
    let mut cursor = store.open_cursor(KeyRange::prefix(b"p")).unwrap();

    let first = cursor.wait_next().unwrap().unwrap();
    assert_eq!(first.key, key(b"p1"));
    backend.expire_all();
    cursor.advance().unwrap();

    let mut rest = Vec::new();
    while let Some(entry) = cursor.wait_next().unwrap() {
        rest.push(entry.key);
        cursor.advance().unwrap();
    }
    assert_eq!(rest, vec![key(b"p2"), key(b"p3")]);
    assert_eq!(cursor.last_key(), Some(&key(b"p3")));
}

#[test]
fn test_cursor_misuse_is_invalid_state() {
    let backend = MemoryBackend::with_stores(["kv"]);
    backend.insert_committed("kv", key(b"a"), Value::Null);
    let txn = begin(&backend);
    let mut cursor = txn.object_store("kv").unwrap().open_cursor(None).unwrap();

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
fn test_transaction_is_send_and_clone() {
    fn assert_send<T: Send>() {}
    fn assert_clone<T: Clone>() {}

    assert_send::<DurableTransaction<MemoryBackend>>();
    assert_send::<Kvtx<MemoryBackend>>();
    assert_clone::<Kvtx<MemoryBackend>>();
}
