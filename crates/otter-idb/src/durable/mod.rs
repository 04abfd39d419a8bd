//! Durable transactions
//!
//! A [`DurableTransaction`] looks like one long-lived transaction to its
//! caller while the backing transaction underneath may go inactive at any
//! moment. Mutations issued while no live transaction exists are queued in a
//! per-store [`OpLog`] and replayed, in order, by the next restart. Reads
//! restart on demand and retry a bounded number of times.

mod cursor;
mod op_log;
mod store;
mod transaction;

pub use cursor::DurableCursor;
pub use op_log::{Mutation, OpLog, PendingOperation};
pub use store::DurableObjectStore;
pub use transaction::DurableTransaction;

use crate::binding::{Backend, StoreHandle, TransactionHandle};

pub(crate) type TxnOf<B> = <B as Backend>::Transaction;
pub(crate) type StoreOf<B> = <TxnOf<B> as TransactionHandle>::Store;
pub(crate) type CursorOf<B> = <StoreOf<B> as StoreHandle>::Cursor;
