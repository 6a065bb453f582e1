//! Error types for the sync engine.

use syncbox_core::CoreError;
use syncbox_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while delivering or applying changes.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport failure. Retryable: the record goes back
    /// to pending with its retry count bumped.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the delivery can be retried.
        retryable: bool,
    },

    /// The remote rejected the bearer credential. Not retryable until
    /// credentials are refreshed externally, but still consumes retry
    /// budget so a stale token cannot spin forever.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The remote answered with a non-2xx status.
    #[error("server error: status {0}")]
    Server(u16),

    /// Malformed inbound message; dropped and logged, never touches
    /// outbox state.
    #[error("validation error: {0}")]
    Validation(String),

    /// Storage or envelope failure from the core layer.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A registered handler rejected an inbound change.
    #[error("handler error: {0}")]
    Handler(String),

    /// The realtime channel is not connected.
    #[error("channel not connected")]
    NotConnected,

    /// `start` was called while the engine was already running.
    #[error("engine already running")]
    AlreadyRunning,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a delivery hitting this error may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Server(_) => true,
            SyncError::NotConnected => true,
            _ => false,
        }
    }

    /// Returns true if the record's payload itself is unusable, so the
    /// record must be failed immediately instead of consuming retry
    /// budget.
    pub fn is_poison(&self) -> bool {
        matches!(self, SyncError::Core(e) if e.is_poison())
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Validation(err.to_string())
    }
}
