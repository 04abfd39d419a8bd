//! Restart, replay and commit

use super::op_log::{Mutation, OpLog};
use super::store::DurableObjectStore;
use super::{StoreOf, TxnOf};
use crate::binding::{Backend, TransactionHandle, TransactionMode, TransactionScope};
use crate::config::DurableConfig;
use crate::error::{IdbError, IdbResult};
use crate::request::CancelToken;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

enum Phase<T> {
    Live(T),
    Inactive,
    /// A commit failed; the transaction must not be used again
    Failed,
}

impl<T> Phase<T> {
    fn name(&self) -> &'static str {
        match self {
            Phase::Live(_) => "live",
            Phase::Inactive => "inactive",
            Phase::Failed => "failed",
        }
    }
}

struct StoreSlot<S> {
    name: String,
    handle: Option<S>,
    log: OpLog,
}

struct TxnState<B: Backend> {
    backend: B,
    scope: TransactionScope,
    config: DurableConfig,
    phase: Phase<TxnOf<B>>,
    generation: u64,
    /// Creation order, which is also replay order
    stores: Vec<StoreSlot<StoreOf<B>>>,
    index: HashMap<String, usize>,
}

impl<B: Backend> TxnState<B> {
    fn ensure_usable(&self) -> IdbResult<()> {
        match self.phase {
            Phase::Failed => Err(IdbError::TransactionFailed),
            _ => Ok(()),
        }
    }

    fn is_live(&self) -> bool {
        matches!(self.phase, Phase::Live(_))
    }

    fn clear_handles(&mut self) {
        for slot in &mut self.stores {
            slot.handle = None;
        }
    }

    /// Forget the current handle. The backing transaction is left to finish
    /// on its own; it is never aborted here.
    fn go_inactive(&mut self) {
        if self.is_live() {
            debug!(scope = %self.scope, generation = self.generation, "transaction went inactive");
            self.phase = Phase::Inactive;
        }
        self.clear_handles();
    }

    /// Open a fresh backing transaction and replay every store's queue.
    ///
    /// On failure nothing is live and every operation that was not applied
    /// is still queued.
    fn restart(&mut self) -> IdbResult<()> {
        let txn = self.backend.open_transaction(&self.scope)?;
        self.generation += 1;

        let mut replayed = 0;
        let mut outcome = Ok(());
        for slot in &mut self.stores {
            let result = txn.object_store(&slot.name).and_then(|handle| {
                let applied = slot.log.replay(&handle)?;
                slot.handle = Some(handle);
                Ok(applied)
            });
            match result {
                Ok(applied) => replayed += applied,
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }

        if let Err(err) = outcome {
            debug!(
                scope = %self.scope,
                generation = self.generation,
                replayed,
                error = %err,
                "restart failed"
            );
            self.phase = Phase::Inactive;
            self.clear_handles();
            return Err(err);
        }

        debug!(scope = %self.scope, generation = self.generation, replayed, "transaction restarted");
        self.phase = Phase::Live(txn);
        Ok(())
    }

    /// Handle for `slot` in the live transaction, acquired on first use.
    /// `None` when no transaction is live.
    fn attach(&mut self, slot: usize) -> IdbResult<Option<&StoreOf<B>>> {
        let Phase::Live(txn) = &self.phase else {
            return Ok(None);
        };
        let entry = &mut self.stores[slot];
        if entry.handle.is_none() {
            entry.handle = Some(txn.object_store(&entry.name)?);
        }
        Ok(entry.handle.as_ref())
    }

    /// Handle for `slot`, restarting first if nothing is live
    fn ready(&mut self, slot: usize) -> IdbResult<&StoreOf<B>> {
        if !self.is_live() {
            self.restart()?;
        }
        self.attach(slot)?
            .ok_or_else(IdbError::transaction_inactive)
    }

    fn pending(&self) -> usize {
        self.stores.iter().map(|slot| slot.log.len()).sum()
    }
}

/// A transaction that survives its backing transaction going inactive.
///
/// Cloning yields another handle to the same transaction.
pub struct DurableTransaction<B: Backend> {
    state: Arc<Mutex<TxnState<B>>>,
}

impl<B: Backend> Clone for DurableTransaction<B> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<B: Backend> fmt::Debug for DurableTransaction<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DurableTransaction")
            .field("scope", &state.scope)
            .field("phase", &state.phase.name())
            .field("generation", &state.generation)
            .field("pending", &state.pending())
            .finish()
    }
}

impl<B: Backend> DurableTransaction<B> {
    /// Open a durable transaction with the default settings
    pub fn begin(backend: B, scope: TransactionScope) -> IdbResult<Self> {
        Self::begin_with_config(backend, scope, DurableConfig::default())
    }

    pub fn begin_with_config(
        backend: B,
        scope: TransactionScope,
        config: DurableConfig,
    ) -> IdbResult<Self> {
        Self::begin_cancellable(backend, scope, config, &CancelToken::never())
    }

    /// Open a durable transaction, giving up if `cancel` fires before the
    /// backing transaction is available.
    pub fn begin_cancellable(
        backend: B,
        scope: TransactionScope,
        config: DurableConfig,
        cancel: &CancelToken,
    ) -> IdbResult<Self> {
        let txn = backend
            .open_transaction_cancellable(&scope, cancel)
            .map_err(|e| e.context("open", scope.to_string()))?;
        let scope = scope.with_mode(txn.mode());
        debug!(scope = %scope, "durable transaction opened");

        Ok(Self {
            state: Arc::new(Mutex::new(TxnState {
                backend,
                scope,
                config,
                phase: Phase::Live(txn),
                generation: 0,
                stores: Vec::new(),
                index: HashMap::new(),
            })),
        })
    }

    pub fn mode(&self) -> TransactionMode {
        self.state.lock().scope.mode()
    }

    pub fn scope(&self) -> TransactionScope {
        self.state.lock().scope.clone()
    }

    pub fn config(&self) -> DurableConfig {
        self.state.lock().config
    }

    /// Whether a backing transaction is currently held
    pub fn is_live(&self) -> bool {
        self.state.lock().is_live()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state.lock().phase, Phase::Failed)
    }

    /// Mutations queued across all stores, waiting for the next restart
    pub fn pending_operations(&self) -> usize {
        self.state.lock().pending()
    }

    /// Durable view of one object store in the scope.
    ///
    /// Views are cached per name and need no live transaction.
    pub fn object_store(&self, name: &str) -> IdbResult<DurableObjectStore<B>> {
        let mut state = self.state.lock();
        state.ensure_usable()?;
        if !state.scope.contains(name) {
            return Err(IdbError::not_found(format!(
                "object store '{name}' is not in the transaction scope {}",
                state.scope
            )));
        }

        let slot = match state.index.get(name) {
            Some(&slot) => slot,
            None => {
                let slot = state.stores.len();
                state.stores.push(StoreSlot {
                    name: name.to_string(),
                    handle: None,
                    log: OpLog::new(),
                });
                state.index.insert(name.to_string(), slot);
                slot
            }
        };
        drop(state);

        Ok(DurableObjectStore::new(self.clone(), slot, name.to_string()))
    }

    /// Flush queued mutations and commit.
    ///
    /// Restarts until a live backing transaction is obtained, at most
    /// `max_attempts` times. A successful commit leaves the transaction
    /// usable: the next call starts a fresh backing transaction. Any failure
    /// leaves it failed.
    pub fn commit(&self) -> IdbResult<()> {
        let mut state = self.state.lock();
        state.ensure_usable()?;
        let attempts = state.config.attempts();
        let target = state.scope.to_string();

        let mut restarts = 0;
        let mut last = None;
        while !state.is_live() {
            if restarts == attempts {
                state.phase = Phase::Failed;
                state.clear_handles();
                let last = last.unwrap_or_else(IdbError::transaction_inactive);
                debug!(scope = %target, attempts, "commit gave up restarting");
                return Err(IdbError::RestartExhausted {
                    attempts,
                    last: Box::new(last),
                });
            }
            restarts += 1;
            match state.restart() {
                Ok(()) => {}
                Err(err) if err.is_transaction_inactive() => last = Some(err),
                Err(err) => {
                    state.phase = Phase::Failed;
                    state.clear_handles();
                    return Err(err.context("commit", target));
                }
            }
        }

        let txn = match std::mem::replace(&mut state.phase, Phase::Inactive) {
            Phase::Live(txn) => txn,
            other => {
                state.phase = other;
                return Err(IdbError::transaction_inactive().context("commit", target));
            }
        };
        state.clear_handles();

        txn.commit();
        match txn.wait_complete() {
            Ok(()) => {
                debug!(scope = %target, generation = state.generation, "transaction committed");
                Ok(())
            }
            Err(err) => {
                debug!(scope = %target, error = %err, "commit failed");
                state.phase = Phase::Failed;
                Err(err.context("commit", target))
            }
        }
    }

    /// Roll back the live backing transaction and drop queued mutations.
    ///
    /// Idempotent. Failures from the backing abort are discarded.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut state.phase, Phase::Inactive) {
            Phase::Live(txn) => {
                txn.abort();
                debug!(scope = %state.scope, generation = state.generation, "transaction aborted");
            }
            Phase::Failed => state.phase = Phase::Failed,
            Phase::Inactive => {}
        }
        state.clear_handles();
        for slot in &mut state.stores {
            slot.log.clear();
        }
    }

    /// Apply a mutation now, or queue it if no backing transaction is live
    pub(crate) fn submit(&self, slot: usize, mutation: Mutation) -> IdbResult<()> {
        let mut state = self.state.lock();
        state.ensure_usable()?;
        let name = state.stores[slot].name.clone();
        if !state.scope.mode().is_read_write() {
            return Err(IdbError::read_only(format!(
                "{} on '{name}' in a read-only transaction",
                mutation.name()
            ))
            .context(mutation.name(), name));
        }

        let outcome = match state.attach(slot) {
            Ok(Some(handle)) => Some(mutation.apply(handle)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        };
        match outcome {
            Some(Ok(())) => return Ok(()),
            Some(Err(err)) if err.is_transaction_inactive() => state.go_inactive(),
            Some(Err(err)) => return Err(err.context(mutation.name(), name)),
            None => {}
        }

        let op = mutation.name();
        let seq = state.stores[slot].log.push(mutation);
        trace!(store = %name, seq, op, "mutation queued");
        Ok(())
    }

    /// Run a read against a live handle, restarting and retrying while the
    /// backing transaction keeps going inactive.
    pub(crate) fn read<T>(
        &self,
        slot: usize,
        operation: &'static str,
        f: impl FnMut(&StoreOf<B>) -> IdbResult<T>,
    ) -> IdbResult<T> {
        self.read_tracked(slot, operation, f)
            .map(|(_, value)| value)
    }

    /// Like [`Self::read`], also returning the generation the value came from
    pub(crate) fn read_tracked<T>(
        &self,
        slot: usize,
        operation: &'static str,
        mut f: impl FnMut(&StoreOf<B>) -> IdbResult<T>,
    ) -> IdbResult<(u64, T)> {
        let mut state = self.state.lock();
        state.ensure_usable()?;
        let attempts = state.config.attempts();

        let mut last = None;
        for attempt in 1..=attempts {
            let result = state.ready(slot).and_then(&mut f);
            match result {
                Ok(value) => return Ok((state.generation, value)),
                Err(err) if err.is_transaction_inactive() => {
                    trace!(store = %state.stores[slot].name, operation, attempt, "read hit inactive transaction");
                    state.go_inactive();
                    last = Some(err);
                }
                Err(err) => return Err(err.context(operation, state.stores[slot].name.clone())),
            }
        }

        Err(IdbError::RetryExhausted {
            operation,
            target: state.stores[slot].name.clone(),
            attempts,
            last: Box::new(last.unwrap_or_else(IdbError::transaction_inactive)),
        })
    }

    /// Note that the backing transaction of `generation` went inactive.
    /// A newer backing transaction is left alone.
    pub(crate) fn mark_inactive(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation == generation && state.is_live() {
            state.go_inactive();
        }
    }
}
