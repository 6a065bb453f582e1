//! Request/response transport abstraction.
//!
//! This is the delivery path of record: the reconciliation poller uses
//! it for both the push sweep and the pull sweep, independent of the
//! realtime channel's health.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use syncbox_protocol::ChangeMessage;

/// Transport for stand-alone request/response delivery.
///
/// Implementations map onto `POST /sync` and `GET /sync/changes` (see
/// [`HttpSyncTransport`](crate::HttpSyncTransport)), or onto whatever
/// a test needs. Timeouts are the transport's own concern; the engine
/// imposes none.
pub trait SyncTransport: Send + Sync + 'static {
    /// Delivers one change message. `Ok` marks the corresponding local
    /// record completed; any error feeds retry bookkeeping.
    fn post_change(&self, msg: &ChangeMessage) -> impl Future<Output = SyncResult<()>> + Send;

    /// Fetches the changes produced since the last successful pull.
    /// Cursor semantics are owned by the remote side.
    fn fetch_changes(&self) -> impl Future<Output = SyncResult<Vec<ChangeMessage>>> + Send;
}

/// Scripted outcome for a mock delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    /// 2xx-style success.
    Ok,
    /// Retryable server failure.
    ServerError,
    /// Rejected credential.
    AuthError,
    /// Connect/send failure.
    TransportError,
}

impl MockOutcome {
    fn into_result(self) -> SyncResult<()> {
        match self {
            MockOutcome::Ok => Ok(()),
            MockOutcome::ServerError => Err(SyncError::Server(500)),
            MockOutcome::AuthError => Err(SyncError::Auth("credential rejected".into())),
            MockOutcome::TransportError => {
                Err(SyncError::transport_retryable("connection refused"))
            }
        }
    }
}

/// A mock transport for tests.
///
/// Posts follow a scripted outcome queue (falling back to a default),
/// and record every delivered message. Pulls drain a queued batch list.
#[derive(Debug, Default)]
pub struct MockTransport {
    post_script: Mutex<VecDeque<MockOutcome>>,
    post_fallback: Mutex<MockOutcome>,
    posts: Mutex<Vec<ChangeMessage>>,
    pulls: Mutex<VecDeque<Vec<ChangeMessage>>>,
    post_delay: Mutex<Option<Duration>>,
}

impl Default for MockOutcome {
    fn default() -> Self {
        MockOutcome::Ok
    }
}

impl MockTransport {
    /// Creates a mock transport that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an outcome for the next post.
    pub fn script_post(&self, outcome: MockOutcome) {
        self.post_script.lock().push_back(outcome);
    }

    /// Sets the outcome used once the script is exhausted.
    pub fn set_post_fallback(&self, outcome: MockOutcome) {
        *self.post_fallback.lock() = outcome;
    }

    /// Queues a batch of messages for the next pull.
    pub fn queue_pull(&self, messages: Vec<ChangeMessage>) {
        self.pulls.lock().push_back(messages);
    }

    /// Adds an artificial delay before each post resolves.
    pub fn set_post_delay(&self, delay: Duration) {
        *self.post_delay.lock() = Some(delay);
    }

    /// Returns every message posted so far.
    pub fn posts(&self) -> Vec<ChangeMessage> {
        self.posts.lock().clone()
    }

    /// Returns the number of delivery attempts observed.
    pub fn post_count(&self) -> usize {
        self.posts.lock().len()
    }
}

impl SyncTransport for MockTransport {
    fn post_change(&self, msg: &ChangeMessage) -> impl Future<Output = SyncResult<()>> + Send {
        let delay = *self.post_delay.lock();
        self.posts.lock().push(msg.clone());
        let outcome = self
            .post_script
            .lock()
            .pop_front()
            .unwrap_or(*self.post_fallback.lock());

        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            outcome.into_result()
        }
    }

    fn fetch_changes(&self) -> impl Future<Output = SyncResult<Vec<ChangeMessage>>> + Send {
        let batch = self.pulls.lock().pop_front().unwrap_or_default();
        async move { Ok(batch) }
    }
}
