use crate::coordinator::Validity;
use folio_core::{DocumentId, IntegrityError, OperationId};
use std::time::Duration;
use thiserror::Error;

/// Failure of the external app's key-value storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage quota exceeded writing `{key}`")]
    QuotaExceeded { key: String },

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of the extension's own document/project store.
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("document {0} not found")]
    NotFound(DocumentId),

    #[error("document store backend failed: {0}")]
    Backend(String),

    #[error("document store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to get an event processed by at least one listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    #[error("no listener is registered")]
    NoListeners,

    #[error("every listener rejected the event: {0}")]
    Rejected(String),

    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Transient storage failure; retried.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Malformed external data; aborts the cycle, never retried.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// Sync event was not accepted; retried.
    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Documents(#[from] DocumentStoreError),

    /// The operation lost its right to run; abandoned silently.
    #[error("operation {0} abandoned: {1}")]
    Coordination(OperationId, Validity),

    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("engine is stopped")]
    Stopped,

    /// A switch attempt ended without reporting an outcome.
    #[error("document switch was interrupted")]
    Interrupted,
}

impl SyncError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Store(_) | SyncError::Emit(_) | SyncError::Documents(_)
        )
    }
}
