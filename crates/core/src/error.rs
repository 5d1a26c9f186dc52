//! Error types for Koya
//!
//! Every fallible operation in the workspace returns [`KoyaResult`]. We use
//! `thiserror` for the `Display` and `Error` implementations.
//!
//! ## Propagation
//!
//! Errors raised inside a transaction body abort the outermost transaction and
//! reach the caller unchanged. Nested callers that arrive after the abort see
//! [`KoyaError::TransactionAborted`]. The only errors swallowed anywhere are the
//! codec's text fallback and secondary failures during rollback.

use crate::types::{Revision, RowId};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Koya operations
pub type KoyaResult<T> = std::result::Result<T, KoyaError>;

/// Error types for the Koya engine
#[derive(Debug, Error)]
pub enum KoyaError {
    /// An operation requiring an active transaction was invoked outside one
    #[error("No active transaction on this store")]
    TransactionNotFound,

    /// The enclosing outermost transaction already failed
    #[error("Transaction aborted: {reason}")]
    TransactionAborted {
        /// Message of the failure that aborted the transaction
        reason: String,
    },

    /// The rowid has no class tag (deleted or never existed)
    #[error("Object not found: {0}")]
    ObjectNotFound(RowId),

    /// Revert requested on a store opened without the property log
    #[error("Cannot revert: property logging is disabled for this store")]
    CanNotRevert,

    /// Revert target predates the last log compaction
    #[error("Cannot revert to {requested}: history before {horizon} was compacted by GC")]
    RevertBeyondCompaction {
        /// Requested revision
        requested: Revision,
        /// Oldest revision still reconstructible
        horizon: Revision,
    },

    /// No materializer registered for a class tag
    #[error("Unknown class tag: {0}")]
    UnknownClass(String),

    /// The stored class tag differs from the type requested
    #[error("Class mismatch for object {rowid}: expected {expected}, found {found}")]
    ClassMismatch {
        /// Object being materialized
        rowid: RowId,
        /// Tag of the requested type
        expected: String,
        /// Tag stored under `m.<rowid>`
        found: String,
    },

    /// The backend stayed busy past the configured timeout
    #[error("Backend busy after waiting {waited:?}")]
    Busy {
        /// Total time spent polling
        waited: Duration,
    },

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persisted data failed validation
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Caller supplied an invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not valid in the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Application-level failure raised from a transaction body
    #[error("{0}")]
    Application(String),
}

impl KoyaError {
    /// Create an application error, typically to abort a transaction body
    pub fn application(msg: impl Into<String>) -> Self {
        KoyaError::Application(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        KoyaError::InvalidInput(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        KoyaError::InvalidOperation(msg.into())
    }

    /// Create a corruption error
    pub fn corruption(msg: impl Into<String>) -> Self {
        KoyaError::Corruption(msg.into())
    }

    /// Create an aborted-transaction error carrying the original failure
    pub fn aborted(reason: impl Into<String>) -> Self {
        KoyaError::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// True for [`KoyaError::ObjectNotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, KoyaError::ObjectNotFound(_))
    }

    /// True for [`KoyaError::TransactionAborted`]
    pub fn is_aborted(&self) -> bool {
        matches!(self, KoyaError::TransactionAborted { .. })
    }

    /// True for [`KoyaError::Busy`]
    pub fn is_busy(&self) -> bool {
        matches!(self, KoyaError::Busy { .. })
    }
}

impl From<rmp_serde::encode::Error> for KoyaError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        KoyaError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for KoyaError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        KoyaError::Serialization(e.to_string())
    }
}
