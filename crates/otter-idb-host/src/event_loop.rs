//! The host thread
//!
//! All database work happens on one thread that owns the [`HostState`].
//! Between jobs it fires idle deadlines, which is how transactions commit
//! behind their callers' backs.

use crate::engine::{HostState, OpenOutcome, StoreOp, StoreReply};
use crate::schema::SchemaChange;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use otter_idb::TransactionScope;
use otter_idb::request::Completer;
use std::time::Instant;
use tracing::{debug, info_span, trace};

/// Job submitted to the host thread
pub(crate) enum Job {
    OpenDb {
        name: String,
        version: u64,
        reply: Completer<OpenOutcome>,
    },
    Upgrade {
        name: String,
        version: u64,
        changes: Vec<SchemaChange>,
        reply: Completer<Vec<String>>,
    },
    Begin {
        db: String,
        scope: TransactionScope,
        reply: Completer<u64>,
    },
    Store {
        txn: u64,
        store: String,
        op: StoreOp,
        reply: Completer<StoreReply>,
    },
    Commit {
        txn: u64,
    },
    Abort {
        txn: u64,
    },
    WaitComplete {
        txn: u64,
        reply: Completer<()>,
    },
    /// Last handle to a transaction went away
    Release {
        txn: u64,
    },
    Shutdown,
}

/// Process jobs until shutdown or until every sender is gone
pub(crate) fn run_host(jobs: Receiver<Job>, mut state: HostState) {
    let _span = info_span!("idb_host").entered();
    debug!("host starting");

    loop {
        let received = match state.next_deadline() {
            Some(deadline) => jobs.recv_deadline(deadline),
            None => jobs.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(Job::Shutdown) => {
                debug!("host shutdown requested");
                break;
            }
            Ok(job) => execute_job(&mut state, job),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("job channel disconnected");
                break;
            }
        }
        state.expire(Instant::now());
    }

    state.shutdown();
    debug!("host stopped");
}

fn execute_job(state: &mut HostState, job: Job) {
    match job {
        Job::OpenDb {
            name,
            version,
            reply,
        } => reply.complete(state.open_db(&name, version)),
        Job::Upgrade {
            name,
            version,
            changes,
            reply,
        } => reply.complete(state.upgrade(&name, version, changes)),
        Job::Begin { db, scope, reply } => {
            reply.complete(state.begin(&db, scope, Instant::now()));
        }
        Job::Store {
            txn,
            store,
            op,
            reply,
        } => {
            trace!(txn, store = %store, op = op.name(), "request");
            reply.complete(state.request(txn, &store, op, Instant::now()));
        }
        Job::Commit { txn } => state.commit(txn, "explicit"),
        Job::Abort { txn } => state.abort(txn),
        Job::WaitComplete { txn, reply } => state.wait_complete(txn, reply),
        Job::Release { txn } => state.release(txn),
        Job::Shutdown => {}
    }
}
