//! Change records: the durable unit of pending work.

use crate::envelope::Envelope;
use std::time::SystemTime;
use syncbox_protocol::Action;
use uuid::Uuid;

/// Opaque unique identifier of a change record, assigned at creation.
pub type RecordId = Uuid;

/// Lifecycle status of a change record.
///
/// `InFlight` is the claim hold: a compare-and-swap from `Pending`
/// taken by exactly one sender before a delivery attempt, so the
/// realtime channel and the reconciliation poller can never submit the
/// same record concurrently. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    /// Waiting for a delivery attempt.
    Pending,
    /// Claimed by a sender; a delivery attempt is in progress.
    InFlight,
    /// Delivered successfully. Terminal.
    Completed,
    /// Retry budget exhausted or payload unusable. Terminal.
    Failed,
}

impl ChangeStatus {
    /// Returns true if no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChangeStatus::Completed | ChangeStatus::Failed)
    }
}

/// A locally produced change awaiting enqueue.
#[derive(Debug, Clone)]
pub struct NewChange {
    /// Logical entity type; opaque to the engine.
    pub entity_type: String,
    /// Identifier of the affected entity.
    pub entity_id: String,
    /// What happened to the entity.
    pub action: Action,
    /// Sealed payload, or `None` for payload-less changes.
    pub payload: Option<Envelope>,
}

impl NewChange {
    /// Creates a new change.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: Action,
        payload: Option<Envelope>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action,
            payload,
        }
    }
}

/// A durable unit of pending work in the outbox.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    /// Unique identifier, immutable after creation.
    pub id: RecordId,
    /// Store-assigned monotonic sequence; defines FIFO order together
    /// with `created_at`.
    pub seq: u64,
    /// Logical entity type.
    pub entity_type: String,
    /// Identifier of the affected entity.
    pub entity_id: String,
    /// What happened to the entity.
    pub action: Action,
    /// Sealed payload, or `None`.
    pub payload: Option<Envelope>,
    /// Current lifecycle status.
    pub status: ChangeStatus,
    /// Number of failed delivery attempts so far.
    pub retry_count: u32,
    /// When the record was enqueued.
    pub created_at: SystemTime,
    /// When the record last changed status.
    pub updated_at: SystemTime,
}

impl ChangeRecord {
    pub(crate) fn from_new(change: NewChange, seq: u64) -> Self {
        let now = SystemTime::now();
        Self {
            id: Uuid::new_v4(),
            seq,
            entity_type: change.entity_type,
            entity_id: change.entity_id,
            action: change.action,
            payload: change.payload,
            status: ChangeStatus::Pending,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
