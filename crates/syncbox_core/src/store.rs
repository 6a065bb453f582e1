//! Outbox store: the durable, append-mostly log of change records.

use crate::error::{CoreError, CoreResult};
use crate::record::{ChangeRecord, ChangeStatus, NewChange, RecordId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Contract for the durable record store backing the outbox.
///
/// The store is the single shared mutable resource of the engine. It is
/// accessed concurrently by the enqueue caller, the realtime channel's
/// flush loop, and the reconciliation poller's push sweep. Every
/// mutation is a compare-and-swap on status, so the exclusion property
/// holds across processes and workers, not just within one lock scope.
///
/// Cleanup of terminal records is an external collaborator's job; this
/// contract never deletes or compacts.
pub trait OutboxStore: Send + Sync {
    /// Persists a new record with status `Pending` and retry count 0.
    ///
    /// Never performs network I/O; fails only on a storage fault.
    fn enqueue(&self, change: NewChange) -> CoreResult<RecordId>;

    /// Reads a record by id.
    fn get(&self, id: RecordId) -> CoreResult<Option<ChangeRecord>>;

    /// Returns pending records ordered oldest-first, bounded by `limit`.
    ///
    /// Claimed (in-flight) and terminal records are excluded.
    fn dequeue_pending(&self, limit: usize) -> CoreResult<Vec<ChangeRecord>>;

    /// Atomically claims a pending record for delivery.
    ///
    /// Returns `false` if the record is already claimed or no longer
    /// pending, so a second concurrent sender skips it.
    fn claim(&self, id: RecordId) -> CoreResult<bool>;

    /// Terminal transition to `Completed`; releases the claim.
    fn mark_completed(&self, id: RecordId) -> CoreResult<()>;

    /// Records a failed delivery attempt.
    ///
    /// Increments the retry count exactly once. If the new count
    /// reaches `max_retries` the record becomes `Failed` (terminal),
    /// otherwise it returns to `Pending` and may be retried later.
    /// Returns the resulting status.
    fn mark_retry_or_failed(&self, id: RecordId, max_retries: u32) -> CoreResult<ChangeStatus>;

    /// Terminal transition to `Failed`, bypassing the retry budget.
    ///
    /// Used when the payload itself is unusable (corrupt envelope), so
    /// retrying can never succeed.
    fn mark_failed(&self, id: RecordId) -> CoreResult<()>;
}

/// In-memory reference implementation of [`OutboxStore`].
///
/// Suitable for tests and for embedding where durability is delegated
/// elsewhere; production deployments implement [`OutboxStore`] over
/// their own record store.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    records: RwLock<HashMap<RecordId, ChangeRecord>>,
    next_seq: AtomicU64,
}

impl MemoryOutbox {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records in any status.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the outbox holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn transition(
        &self,
        id: RecordId,
        expected: &[ChangeStatus],
        to: ChangeStatus,
        bump_retry: bool,
    ) -> CoreResult<ChangeRecord> {
        let mut records = self.records.write();
        let record = records.get_mut(&id).ok_or(CoreError::RecordNotFound(id))?;

        if !expected.contains(&record.status) {
            return Err(CoreError::InvalidTransition {
                id,
                from: record.status,
                to,
            });
        }

        record.status = to;
        if bump_retry {
            record.retry_count += 1;
        }
        record.updated_at = SystemTime::now();
        Ok(record.clone())
    }
}

impl OutboxStore for MemoryOutbox {
    fn enqueue(&self, change: NewChange) -> CoreResult<RecordId> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let record = ChangeRecord::from_new(change, seq);
        let id = record.id;
        self.records.write().insert(id, record);
        Ok(id)
    }

    fn get(&self, id: RecordId) -> CoreResult<Option<ChangeRecord>> {
        Ok(self.records.read().get(&id).cloned())
    }

    fn dequeue_pending(&self, limit: usize) -> CoreResult<Vec<ChangeRecord>> {
        let records = self.records.read();
        let mut pending: Vec<ChangeRecord> = records
            .values()
            .filter(|r| r.status == ChangeStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.seq);
        pending.truncate(limit);
        Ok(pending)
    }

    fn claim(&self, id: RecordId) -> CoreResult<bool> {
        let mut records = self.records.write();
        let record = records.get_mut(&id).ok_or(CoreError::RecordNotFound(id))?;

        if record.status != ChangeStatus::Pending {
            return Ok(false);
        }
        record.status = ChangeStatus::InFlight;
        record.updated_at = SystemTime::now();
        Ok(true)
    }

    fn mark_completed(&self, id: RecordId) -> CoreResult<()> {
        self.transition(
            id,
            &[ChangeStatus::InFlight, ChangeStatus::Pending],
            ChangeStatus::Completed,
            false,
        )?;
        Ok(())
    }

    fn mark_retry_or_failed(&self, id: RecordId, max_retries: u32) -> CoreResult<ChangeStatus> {
        let mut records = self.records.write();
        let record = records.get_mut(&id).ok_or(CoreError::RecordNotFound(id))?;

        if record.status.is_terminal() {
            return Err(CoreError::InvalidTransition {
                id,
                from: record.status,
                to: ChangeStatus::Failed,
            });
        }

        record.retry_count += 1;
        record.status = if record.retry_count >= max_retries {
            ChangeStatus::Failed
        } else {
            ChangeStatus::Pending
        };
        record.updated_at = SystemTime::now();
        Ok(record.status)
    }

    fn mark_failed(&self, id: RecordId) -> CoreResult<()> {
        self.transition(
            id,
            &[ChangeStatus::InFlight, ChangeStatus::Pending],
            ChangeStatus::Failed,
            false,
        )?;
        Ok(())
    }
}
