//! Error types for otter-idb
//!
//! Backing stores report failures the way IndexedDB does: a DOM exception
//! name plus a human-readable message. The durable layer only ever needs to
//! tell one of them apart, the "transaction is not active" condition, which is
//! what [`is_transaction_inactive`] recognizes.

use std::fmt;
use thiserror::Error;

/// Stable substring of the message a backing store uses when a request is
/// placed against a transaction it has already closed.
pub const INACTIVE_MESSAGE: &str = "transaction is not active";

/// DOM exception names surfaced by IndexedDB-style backing stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomErrorName {
    Abort,
    Constraint,
    Data,
    InvalidState,
    NotFound,
    ReadOnly,
    TransactionInactive,
    Version,
    Unknown,
}

impl DomErrorName {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomErrorName::Abort => "AbortError",
            DomErrorName::Constraint => "ConstraintError",
            DomErrorName::Data => "DataError",
            DomErrorName::InvalidState => "InvalidStateError",
            DomErrorName::NotFound => "NotFoundError",
            DomErrorName::ReadOnly => "ReadOnlyError",
            DomErrorName::TransactionInactive => "TransactionInactiveError",
            DomErrorName::Version => "VersionError",
            DomErrorName::Unknown => "UnknownError",
        }
    }
}

impl fmt::Display for DomErrorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during durable transaction operations
#[derive(Debug, Error)]
pub enum IdbError {
    /// Failure reported by the backing store
    #[error("{name}: {message}")]
    Dom { name: DomErrorName, message: String },

    /// Empty key passed to a key-value operation
    #[error("key must not be empty")]
    EmptyKey,

    /// Stored value or key does not have the shape the caller expects
    #[error("expected {expected}, found {found}")]
    UnexpectedValue {
        expected: &'static str,
        found: &'static str,
    },

    /// Backing store failure with the call that produced it
    #[error("{operation} on {target}: {source}")]
    Operation {
        operation: &'static str,
        target: String,
        #[source]
        source: Box<IdbError>,
    },

    /// A read kept racing into an inactive transaction
    #[error("{operation} on {target} gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        operation: &'static str,
        target: String,
        attempts: usize,
        #[source]
        last: Box<IdbError>,
    },

    /// Commit could not obtain a live transaction to flush into
    #[error("unable to restart transaction without it going inactive ({attempts} attempts)")]
    RestartExhausted {
        attempts: usize,
        #[source]
        last: Box<IdbError>,
    },

    /// The durable transaction failed to commit and must not be reused
    #[error("transaction failed to commit and can no longer be used")]
    TransactionFailed,

    /// The caller cancelled the open
    #[error("operation was cancelled")]
    Cancelled,

    /// The completion side of a request went away without answering
    #[error("backing store host is no longer running")]
    HostClosed,

    /// Persistent storage failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl IdbError {
    /// Create a backing store error
    pub fn dom(name: DomErrorName, message: impl Into<String>) -> Self {
        Self::Dom {
            name,
            message: message.into(),
        }
    }

    /// The error a backing store raises for requests on a closed transaction
    pub fn transaction_inactive() -> Self {
        Self::dom(
            DomErrorName::TransactionInactive,
            "The transaction is not active.",
        )
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::dom(DomErrorName::Constraint, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::dom(DomErrorName::Data, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::dom(DomErrorName::InvalidState, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::dom(DomErrorName::NotFound, message)
    }

    pub fn read_only(message: impl Into<String>) -> Self {
        Self::dom(DomErrorName::ReadOnly, message)
    }

    /// Attach the failing call to the error.
    ///
    /// Errors that already name their call are returned unchanged so context
    /// is added exactly once.
    pub fn context(self, operation: &'static str, target: impl Into<String>) -> Self {
        match self {
            Self::Operation { .. }
            | Self::RetryExhausted { .. }
            | Self::RestartExhausted { .. }
            | Self::TransactionFailed
            | Self::EmptyKey => self,
            other => Self::Operation {
                operation,
                target: target.into(),
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with call context stripped
    pub fn root(&self) -> &IdbError {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// DOM exception name of the underlying backing store error, if any
    pub fn dom_name(&self) -> Option<DomErrorName> {
        match self.root() {
            Self::Dom { name, .. } => Some(*name),
            _ => None,
        }
    }

    pub fn is_transaction_inactive(&self) -> bool {
        is_transaction_inactive(self)
    }
}

/// Check if an error is the "inactive transaction" error.
///
/// Matches the `TransactionInactiveError` name or the stable message
/// substring. Exhaustion errors are final and never match, even though they
/// carry an inactive error as their cause.
pub fn is_transaction_inactive(err: &IdbError) -> bool {
    match err {
        IdbError::Dom { name, message } => {
            *name == DomErrorName::TransactionInactive || message.contains(INACTIVE_MESSAGE)
        }
        IdbError::Operation { source, .. } => is_transaction_inactive(source),
        _ => false,
    }
}

/// Result type alias for otter-idb operations
pub type IdbResult<T> = Result<T, IdbError>;
