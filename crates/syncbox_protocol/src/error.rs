//! Error types for wire message handling.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The inbound message is not valid JSON or is missing required
    /// fields. Callers drop and log such messages; they never affect
    /// local outbox state.
    #[error("invalid message: {0}")]
    Validation(String),

    /// A message could not be serialized. This indicates a programming
    /// error (e.g. a payload value that cannot be represented as JSON).
    #[error("encoding failed: {0}")]
    Encoding(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Validation(err.to_string())
    }
}
