//! Request completion handoff
//!
//! Every backing store request is answered exactly once through a single-slot
//! channel: the store side holds a [`Completer`], the caller blocks on the
//! matching [`Pending`]. Dropping the completer without answering wakes the
//! caller with [`IdbError::HostClosed`].

use crate::error::{IdbError, IdbResult};
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, never, select};
use parking_lot::Mutex;
use std::time::Duration;

/// Create a connected completer/pending pair
pub fn request<T>() -> (Completer<T>, Pending<T>) {
    let (tx, rx) = bounded(1);
    (Completer { tx }, Pending { rx })
}

/// Store side of a request. Consumed by [`Completer::complete`].
#[derive(Debug)]
pub struct Completer<T> {
    tx: Sender<IdbResult<T>>,
}

impl<T> Completer<T> {
    /// Deliver the result. A waiter that already gave up is ignored.
    pub fn complete(self, result: IdbResult<T>) {
        let _ = self.tx.try_send(result);
    }

    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, err: IdbError) {
        self.complete(Err(err));
    }
}

/// Caller side of a request
#[derive(Debug)]
pub struct Pending<T> {
    rx: Receiver<IdbResult<T>>,
}

impl<T> Pending<T> {
    /// Block until the request completes
    pub fn wait(self) -> IdbResult<T> {
        self.rx.recv().map_err(|_| IdbError::HostClosed)?
    }

    /// Block until the request completes or `cancel` fires
    pub fn wait_cancellable(self, cancel: &CancelToken) -> IdbResult<T> {
        select! {
            recv(self.rx) -> msg => msg.map_err(|_| IdbError::HostClosed)?,
            recv(cancel.rx) -> _ => Err(IdbError::Cancelled),
        }
    }

    /// Block for at most `timeout`; `None` if nothing arrived in time
    pub fn wait_timeout(&self, timeout: Duration) -> Option<IdbResult<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Some(Err(IdbError::HostClosed))
            }
        }
    }
}

/// Owner side of a cancellation signal
#[derive(Debug)]
pub struct CancelSource {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Hand out a token observing this source
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.rx.clone(),
        }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation signal. Fires when the sender is dropped.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    /// A token that never fires
    pub fn never() -> Self {
        Self { rx: never() }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// `Err(Cancelled)` once the token has fired
    pub fn check(&self) -> IdbResult<()> {
        if self.is_cancelled() {
            Err(IdbError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_complete_from_other_thread() {
        let (completer, pending) = request::<u32>();
        let worker = thread::spawn(move || completer.succeed(7));
        assert_eq!(pending.wait().unwrap(), 7);
        worker.join().unwrap();
    }

    #[test]
    fn test_dropped_completer_reports_host_closed() {
        let (completer, pending) = request::<()>();
        drop(completer);
        assert!(matches!(pending.wait(), Err(IdbError::HostClosed)));
    }

    #[test]
    fn test_completion_after_waiter_left_is_ignored() {
        let (completer, pending) = request::<()>();
        drop(pending);
        completer.succeed(());
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let source = CancelSource::new();
        let token = source.token();
        let (_completer, pending) = request::<()>();

        assert!(!token.is_cancelled());
        let canceller = thread::spawn(move || source.cancel());
        assert!(matches!(
            pending.wait_cancellable(&token),
            Err(IdbError::Cancelled)
        ));
        canceller.join().unwrap();
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
    }

    #[test]
    fn test_never_token() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        let (completer, pending) = request::<&str>();
        completer.succeed("done");
        assert_eq!(pending.wait_cancellable(&token).unwrap(), "done");
    }

    #[test]
    fn test_wait_timeout() {
        let (completer, pending) = request::<u8>();
        assert!(pending.wait_timeout(Duration::from_millis(5)).is_none());
        completer.succeed(1);
        assert_eq!(
            pending.wait_timeout(Duration::from_millis(5)).unwrap().unwrap(),
            1
        );
    }
}
