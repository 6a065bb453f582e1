//! Routes inbound change messages to per-entity-type handlers.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use syncbox_core::{Envelope, EnvelopeSealer};
use syncbox_protocol::{Action, ChangeMessage};
use tracing::warn;

/// A per-entity-type change handler.
///
/// Side effects are entirely the handler's responsibility. The apply
/// policy is last-writer-wins: the engine performs no merge, so
/// concurrent local and remote edits to the same entity resolve purely
/// by arrival order here.
pub trait ChangeHandler: Send + Sync {
    /// Applies one change to local state.
    fn apply(
        &self,
        action: Action,
        entity_id: &str,
        data: Option<serde_json::Value>,
    ) -> Result<(), HandlerError>;
}

/// Error returned by a [`ChangeHandler`].
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Creates a handler error.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Outcome of dispatching one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler applied the change.
    Applied,
    /// No handler is registered for the entity type; dropped, non-fatal.
    Dropped,
}

/// Maps entity types to registered handlers and feeds them inbound
/// changes, opening sealed payloads with the entity type as context.
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn ChangeHandler>>>,
    sealer: Arc<EnvelopeSealer>,
}

impl Dispatcher {
    /// Creates an empty dispatcher.
    pub fn new(sealer: Arc<EnvelopeSealer>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            sealer,
        }
    }

    /// Registers the handler for an entity type, replacing any previous
    /// registration.
    pub fn register(&self, entity_type: impl Into<String>, handler: Arc<dyn ChangeHandler>) {
        self.handlers.write().insert(entity_type.into(), handler);
    }

    /// Returns true if a handler is registered for the entity type.
    pub fn is_registered(&self, entity_type: &str) -> bool {
        self.handlers.read().contains_key(entity_type)
    }

    /// Routes one inbound message to its handler.
    ///
    /// Unregistered entity types are logged and dropped. A sealed
    /// payload (an `enc:v1:` string) is opened under the entity type
    /// before the handler sees it; opening failures are decryption
    /// errors and never reach the handler.
    pub fn dispatch(&self, msg: &ChangeMessage) -> SyncResult<DispatchOutcome> {
        let handler = match self.handlers.read().get(&msg.entity_type) {
            Some(handler) => Arc::clone(handler),
            None => {
                warn!(entity_type = %msg.entity_type, "dropping change for unregistered entity type");
                return Ok(DispatchOutcome::Dropped);
            }
        };

        let data = match &msg.data {
            Some(value) => Some(self.open_payload(&msg.entity_type, value)?),
            None => None,
        };

        handler
            .apply(msg.action, &msg.entity_id, data)
            .map_err(|e| SyncError::Handler(e.to_string()))?;
        Ok(DispatchOutcome::Applied)
    }

    /// Opens a possibly sealed payload value.
    fn open_payload(
        &self,
        entity_type: &str,
        value: &serde_json::Value,
    ) -> SyncResult<serde_json::Value> {
        let sealed = match value.as_str() {
            Some(s) if Envelope::is_envelope_str(s) => s,
            _ => return Ok(value.clone()),
        };

        let envelope: Envelope = sealed.parse().map_err(SyncError::Core)?;
        let plaintext = self.sealer.open(&envelope, entity_type)?;
        serde_json::from_slice(&plaintext).map_err(|e| {
            SyncError::Core(syncbox_core::CoreError::Decryption(format!(
                "sealed payload is not JSON: {e}"
            )))
        })
    }
}
