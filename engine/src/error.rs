//! Error types for the Satchel engine.

use crate::resolver::Conflict;
use crate::{DatasetName, Identity};
use thiserror::Error;

/// All possible errors from the Satchel engine.
///
/// The engine never retries on its own. Every variant is surfaced to the
/// caller of the operation that produced it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(DatasetName),

    // Remote errors
    #[error("service error ({code}): {message}")]
    Service { code: String, message: String },

    // Session errors
    #[error("synchronize already in progress for dataset '{dataset}' of identity {identity}")]
    SyncInProgress {
        identity: Identity,
        dataset: DatasetName,
    },

    #[error("{} unresolved conflict(s) in dataset '{dataset}'", conflicts.len())]
    UnresolvedConflict {
        dataset: DatasetName,
        conflicts: Vec<Conflict>,
    },

    #[error("dataset '{0}' was deleted remotely while local writes were pending")]
    DeletionConflict(DatasetName),

    #[error("dataset handle is bound to identity {bound}, current identity is {current}")]
    IdentityMismatch { bound: Identity, current: Identity },

    #[error("synchronize cancelled")]
    Cancelled,

    // Local persistence errors
    #[error("local storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Build a service error from a code and message.
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Service {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether the error came from the remote store.
    pub fn is_service(&self) -> bool {
        matches!(self, Error::Service { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
