use super::store::DurableObjectStore;
use super::CursorOf;
use crate::binding::{Backend, CursorEntry, CursorHandle};
use crate::error::{IdbError, IdbResult};
use crate::key::{Key, KeyRange};
use std::fmt;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// The next entry has been requested
    Requested,
    /// An entry was handed out and `advance` has not been called yet
    Delivered,
    Exhausted,
}

/// Cursor that keeps its position across restarts.
///
/// When the backing transaction goes inactive mid-scan, the cursor reopens on
/// whatever is left of its range after the last delivered key.
pub struct DurableCursor<B: Backend> {
    store: DurableObjectStore<B>,
    range: Option<KeyRange>,
    inner: Option<(u64, CursorOf<B>)>,
    last_key: Option<Key>,
    state: CursorState,
}

impl<B: Backend> fmt::Debug for DurableCursor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableCursor")
            .field("store", &self.store.name())
            .field("range", &self.range)
            .field("last_key", &self.last_key)
            .field("state", &self.state)
            .finish()
    }
}

impl<B: Backend> DurableCursor<B> {
    pub(crate) fn open(store: DurableObjectStore<B>, range: Option<KeyRange>) -> IdbResult<Self> {
        let inner = store.open_backend_cursor(range.as_ref())?;
        Ok(Self {
            store,
            range,
            inner: Some(inner),
            last_key: None,
            state: CursorState::Requested,
        })
    }

    /// Key of the most recently delivered entry
    pub fn last_key(&self) -> Option<&Key> {
        self.last_key.as_ref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    /// Part of the range not yet delivered. `None` when nothing is left;
    /// `Some(None)` for an unbounded remainder.
    fn remaining(&self) -> Option<Option<KeyRange>> {
        match (&self.range, &self.last_key) {
            (range, None) => Some(range.clone()),
            (Some(range), Some(last)) => range.after(last).map(Some),
            (None, Some(last)) => Some(Some(KeyRange::lower_bound(last.clone(), true))),
        }
    }

    fn exhaust(&mut self) {
        self.state = CursorState::Exhausted;
        self.inner = None;
    }

    /// Wait for the requested entry. `None` once the range is exhausted.
    pub fn wait_next(&mut self) -> IdbResult<Option<CursorEntry>> {
        match self.state {
            CursorState::Exhausted => return Ok(None),
            CursorState::Delivered => {
                return Err(IdbError::invalid_state(
                    "cursor entry already delivered; call advance first",
                ));
            }
            CursorState::Requested => {}
        }

        let attempts = self.store.transaction().config().attempts();
        let mut last = None;
        for attempt in 1..=attempts {
            if self.inner.is_none() {
                let Some(range) = self.remaining() else {
                    self.exhaust();
                    return Ok(None);
                };
                trace!(store = self.store.name(), attempt, "reopening cursor");
                self.inner = Some(self.store.open_backend_cursor(range.as_ref())?);
            }

            let Some((generation, cursor)) = self.inner.as_mut() else {
                continue;
            };
            let generation = *generation;
            match cursor.wait_next() {
                Ok(Some(entry)) => {
                    self.last_key = Some(entry.key.clone());
                    self.state = CursorState::Delivered;
                    return Ok(Some(entry));
                }
                Ok(None) => {
                    self.exhaust();
                    return Ok(None);
                }
                Err(err) if err.is_transaction_inactive() => {
                    self.inner = None;
                    self.store.mark_inactive(generation);
                    last = Some(err);
                }
                Err(err) => return Err(err.context("cursor", self.store.name())),
            }
        }

        Err(IdbError::RetryExhausted {
            operation: "cursor",
            target: self.store.name().to_string(),
            attempts,
            last: Box::new(last.unwrap_or_else(IdbError::transaction_inactive)),
        })
    }

    /// Request the entry after the one last delivered. A no-op once the
    /// cursor is exhausted.
    pub fn advance(&mut self) -> IdbResult<()> {
        match self.state {
            CursorState::Exhausted => return Ok(()),
            CursorState::Requested => {
                return Err(IdbError::invalid_state(
                    "cursor is already waiting for an entry",
                ));
            }
            CursorState::Delivered => {}
        }

        self.state = CursorState::Requested;
        let Some((generation, cursor)) = self.inner.as_mut() else {
            return Ok(());
        };
        let generation = *generation;
        match cursor.advance() {
            Ok(()) => Ok(()),
            Err(err) if err.is_transaction_inactive() => {
                // picked up again by the next wait_next
                self.inner = None;
                self.store.mark_inactive(generation);
                Ok(())
            }
            Err(err) => Err(err.context("advance", self.store.name())),
        }
    }
}
