//! Error types for outbox and envelope operations.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the outbox store or the encryption envelope.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The referenced record does not exist in the store.
    #[error("record not found: {0}")]
    RecordNotFound(crate::record::RecordId),

    /// A status transition violated the expected-status precondition.
    #[error("invalid transition for record {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// The record whose transition was rejected.
        id: crate::record::RecordId,
        /// Status the record actually had.
        from: crate::record::ChangeStatus,
        /// Status the caller tried to move it to.
        to: crate::record::ChangeStatus,
    },

    /// The durable store itself failed to persist or read a record.
    #[error("storage fault: {0}")]
    Storage(String),

    /// Key material had the wrong length.
    #[error("invalid key size: got {got} bytes, expected {expected}")]
    InvalidKeySize {
        /// Provided key length.
        got: usize,
        /// Required key length.
        expected: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The envelope is malformed, tampered with, or was produced under
    /// a different context. Retrying cannot fix this.
    #[error("decryption failed: {0}")]
    Decryption(String),
}

impl CoreError {
    /// Returns true if this error means the payload itself is unusable,
    /// so the owning record should be failed without consuming retry
    /// budget.
    pub fn is_poison(&self) -> bool {
        matches!(self, CoreError::Encryption(_) | CoreError::Decryption(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ChangeStatus;

    #[test]
    fn poison_classification() {
        assert!(CoreError::Decryption("bad tag".into()).is_poison());
        assert!(CoreError::Encryption("oops".into()).is_poison());
        assert!(!CoreError::Storage("disk full".into()).is_poison());
        assert!(!CoreError::InvalidTransition {
            id: uuid::Uuid::nil(),
            from: ChangeStatus::Completed,
            to: ChangeStatus::Pending,
        }
        .is_poison());
    }

    #[test]
    fn error_display() {
        let err = CoreError::InvalidKeySize {
            got: 16,
            expected: 32,
        };
        assert!(err.to_string().contains("16"));
        assert!(err.to_string().contains("32"));
    }
}
