//! The sync engine façade and its background tasks.

use crate::channel::{ChannelConnection, ChannelTransport, ConnectionState};
use crate::config::SyncConfig;
use crate::dispatcher::{ChangeHandler, DispatchOutcome, Dispatcher};
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use syncbox_core::{
    ChangeRecord, ChangeStatus, CoreError, EnvelopeSealer, NewChange, OutboxStore, RecordId,
    SecretProvider,
};
use syncbox_protocol::{Action, ChangeMessage};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counters describing what the engine has done so far.
///
/// This is the inspection surface for delivery outcomes; alerting on
/// failed records is an external collaborator's decision.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Records accepted by `enqueue`.
    pub enqueued: u64,
    /// Records delivered (over either transport).
    pub pushed: u64,
    /// Failed delivery attempts that returned a record to pending.
    pub retries: u64,
    /// Records that reached the failed state.
    pub failed: u64,
    /// Inbound changes applied by a handler.
    pub dispatched: u64,
    /// Inbound changes dropped (unregistered type or apply failure).
    pub dropped: u64,
    /// Successful realtime connections.
    pub connects: u64,
}

struct EngineInner<S, T, C> {
    config: SyncConfig,
    store: Arc<S>,
    transport: Arc<T>,
    channel: Arc<C>,
    sealer: Arc<EnvelopeSealer>,
    dispatcher: Dispatcher,
    conn_state: RwLock<ConnectionState>,
    reconnect_attempt: AtomicU32,
    flush_notify: Notify,
    stats: RwLock<SyncStats>,
}

struct EngineTasks {
    shutdown: watch::Sender<bool>,
    poller: JoinHandle<()>,
    channel: JoinHandle<()>,
}

/// The offline-first change-synchronization engine.
///
/// Coordinates a durable outbox, a reconnecting realtime channel and a
/// periodic reconciliation poller. Locally produced changes are sealed
/// and persisted by [`enqueue`](Self::enqueue) before any delivery is
/// attempted; delivery is at-least-once and remote handlers must
/// tolerate duplicates.
///
/// [`start`](Self::start) spawns the poller and the channel supervisor
/// on the current Tokio runtime; [`stop`](Self::stop) cancels both
/// timers and lets in-flight sends resolve before returning.
pub struct SyncEngine<S, T, C>
where
    S: OutboxStore + 'static,
    T: SyncTransport,
    C: ChannelTransport,
{
    inner: Arc<EngineInner<S, T, C>>,
    runtime: Mutex<Option<EngineTasks>>,
}

impl<S, T, C> SyncEngine<S, T, C>
where
    S: OutboxStore + 'static,
    T: SyncTransport,
    C: ChannelTransport,
{
    /// Creates a new engine.
    ///
    /// The secret provider is consulted once, at construction; rotation
    /// of the root secret is outside this engine's scope.
    pub fn new(
        config: SyncConfig,
        store: Arc<S>,
        transport: Arc<T>,
        channel: Arc<C>,
        secrets: &dyn SecretProvider,
    ) -> SyncResult<Self> {
        let sealer = Arc::new(EnvelopeSealer::new(secrets)?);
        let dispatcher = Dispatcher::new(Arc::clone(&sealer));

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                transport,
                channel,
                sealer,
                dispatcher,
                conn_state: RwLock::new(ConnectionState::Disconnected),
                reconnect_attempt: AtomicU32::new(0),
                flush_notify: Notify::new(),
                stats: RwLock::new(SyncStats::default()),
            }),
            runtime: Mutex::new(None),
        })
    }

    /// Registers the handler for an entity type.
    pub fn register_handler(&self, entity_type: impl Into<String>, handler: Arc<dyn ChangeHandler>) {
        self.inner.dispatcher.register(entity_type, handler);
    }

    /// Seals and persists a local change.
    ///
    /// Never performs network I/O and never surfaces delivery errors;
    /// it fails only when sealing fails or the store cannot persist.
    /// If the realtime channel happens to be connected, the new record
    /// is flushed opportunistically.
    pub fn enqueue(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: Action,
        data: Option<&serde_json::Value>,
    ) -> SyncResult<RecordId> {
        let payload = match data {
            Some(value) => {
                let plaintext = serde_json::to_vec(value)
                    .map_err(|e| SyncError::Validation(format!("unencodable payload: {e}")))?;
                Some(self.inner.sealer.seal(&plaintext, entity_type)?)
            }
            None => None,
        };

        let id = self
            .inner
            .store
            .enqueue(NewChange::new(entity_type, entity_id, action, payload))?;
        self.inner.stats.write().enqueued += 1;
        debug!(record = %id, entity_type, "change enqueued");

        self.inner.flush_notify.notify_one();
        Ok(id)
    }

    /// Starts the reconciliation poller and the channel supervisor.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(&self) -> SyncResult<()> {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return Err(SyncError::AlreadyRunning);
        }

        let (shutdown, rx) = watch::channel(false);
        let poller = tokio::spawn(run_poller(Arc::clone(&self.inner), rx.clone()));
        let channel = tokio::spawn(run_channel(Arc::clone(&self.inner), rx));

        *runtime = Some(EngineTasks {
            shutdown,
            poller,
            channel,
        });
        info!("sync engine started");
        Ok(())
    }

    /// Stops the engine: cancels the poller and reconnect timers, then
    /// waits for both tasks so in-flight delivery attempts resolve
    /// rather than being aborted. Idempotent.
    pub async fn stop(&self) {
        let tasks = self.runtime.lock().take();
        if let Some(tasks) = tasks {
            let _ = tasks.shutdown.send(true);
            let _ = tasks.poller.await;
            let _ = tasks.channel.await;
            info!("sync engine stopped");
        }
    }

    /// Runs one reconciliation tick on demand: push sweep then pull
    /// sweep, exactly as the poller would.
    pub async fn reconcile(&self) {
        self.inner.push_sweep().await;
        self.inner.pull_sweep().await;
    }

    /// Current realtime channel state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.conn_state.read()
    }

    /// Consecutive failed reconnect attempts; zero after any success.
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.reconnect_attempt.load(Ordering::SeqCst)
    }

    /// Snapshot of the engine counters.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Reads a record for inspection.
    pub fn record(&self, id: RecordId) -> SyncResult<Option<ChangeRecord>> {
        Ok(self.inner.store.get(id)?)
    }
}

impl<S, T, C> EngineInner<S, T, C>
where
    S: OutboxStore + 'static,
    T: SyncTransport,
    C: ChannelTransport,
{
    fn set_conn_state(&self, state: ConnectionState) {
        let mut current = self.conn_state.write();
        if *current != state {
            debug!(from = ?*current, to = ?state, "channel state change");
            *current = state;
        }
    }

    /// Builds the outbound wire message for a record, opening its
    /// sealed payload under the entity type.
    fn outbound_message(&self, record: &ChangeRecord) -> SyncResult<ChangeMessage> {
        let data = match &record.payload {
            Some(envelope) => {
                let plaintext = self.sealer.open(envelope, &record.entity_type)?;
                let value = serde_json::from_slice(&plaintext).map_err(|e| {
                    SyncError::Core(CoreError::Decryption(format!(
                        "stored payload is not JSON: {e}"
                    )))
                })?;
                Some(value)
            }
            None => None,
        };

        Ok(ChangeMessage::new(
            record.entity_type.clone(),
            record.entity_id.clone(),
            record.action,
            data,
        ))
    }

    /// Books the outcome of one delivery attempt for a claimed record.
    fn settle(&self, id: RecordId, entity_type: &str, result: SyncResult<()>) {
        match result {
            Ok(()) => {
                if let Err(e) = self.store.mark_completed(id) {
                    error!(record = %id, error = %e, "failed to complete record");
                    return;
                }
                self.stats.write().pushed += 1;
            }
            Err(err) if err.is_poison() => {
                warn!(record = %id, entity_type, error = %err, "payload unusable, failing record");
                if let Err(e) = self.store.mark_failed(id) {
                    error!(record = %id, error = %e, "failed to fail record");
                    return;
                }
                self.stats.write().failed += 1;
            }
            Err(err) => {
                warn!(record = %id, entity_type, error = %err, "delivery failed");
                match self.store.mark_retry_or_failed(id, self.config.max_retries) {
                    Ok(ChangeStatus::Failed) => {
                        warn!(record = %id, entity_type, "retry budget exhausted");
                        let mut stats = self.stats.write();
                        stats.retries += 1;
                        stats.failed += 1;
                    }
                    Ok(_) => self.stats.write().retries += 1,
                    Err(e) => error!(record = %id, error = %e, "retry bookkeeping failed"),
                }
            }
        }
    }

    /// Push sweep: claim each pending record and deliver it over the
    /// request/response path.
    async fn push_sweep(&self) {
        let pending = match self.store.dequeue_pending(self.config.flush_limit) {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "push sweep: store read failed");
                return;
            }
        };

        for record in pending {
            match self.store.claim(record.id) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(record = %record.id, error = %e, "claim failed");
                    continue;
                }
            }

            let result = match self.outbound_message(&record) {
                Ok(msg) => self.transport.post_change(&msg).await,
                Err(e) => Err(e),
            };
            self.settle(record.id, &record.entity_type, result);
        }
    }

    /// Pull sweep: fetch remote changes and hand each to the
    /// dispatcher. Failures are per-message; one bad change never
    /// aborts the rest of the batch.
    async fn pull_sweep(&self) {
        let changes = match self.transport.fetch_changes().await {
            Ok(changes) => changes,
            Err(e) => {
                warn!(error = %e, "pull sweep failed");
                return;
            }
        };

        for msg in changes {
            self.dispatch_inbound(&msg);
        }
    }

    fn dispatch_inbound(&self, msg: &ChangeMessage) {
        match self.dispatcher.dispatch(msg) {
            Ok(DispatchOutcome::Applied) => self.stats.write().dispatched += 1,
            Ok(DispatchOutcome::Dropped) => self.stats.write().dropped += 1,
            Err(e) => {
                warn!(entity_type = %msg.entity_type, error = %e, "failed to apply inbound change");
                self.stats.write().dropped += 1;
            }
        }
    }

    /// Flushes pending records over a live connection.
    ///
    /// Returns false when the connection broke mid-flush; the failed
    /// record's retry bookkeeping has already been done, and remaining
    /// records stay pending for the poller or the next connection.
    async fn flush_connection(&self, conn: &mut C::Connection) -> bool {
        let pending = match self.store.dequeue_pending(self.config.flush_limit) {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "flush: store read failed");
                return true;
            }
        };

        for record in pending {
            match self.store.claim(record.id) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(record = %record.id, error = %e, "claim failed");
                    continue;
                }
            }

            let msg = match self.outbound_message(&record) {
                Ok(msg) => msg,
                Err(e) => {
                    self.settle(record.id, &record.entity_type, Err(e));
                    continue;
                }
            };

            let result = conn.send(&msg).await;
            let alive = result.is_ok();
            self.settle(record.id, &record.entity_type, result);
            if !alive {
                return false;
            }
        }
        true
    }
}

/// Runs the reconciliation poller until shutdown.
async fn run_poller<S, T, C>(inner: Arc<EngineInner<S, T, C>>, mut shutdown: watch::Receiver<bool>)
where
    S: OutboxStore + 'static,
    T: SyncTransport,
    C: ChannelTransport,
{
    let mut ticker = tokio::time::interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; consume it so sweeps start one
    // full interval after `start`, like a plain periodic timer.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("poller stopped");
                return;
            }
            _ = ticker.tick() => {
                inner.push_sweep().await;
                inner.pull_sweep().await;
            }
        }
    }
}

enum Served {
    Shutdown,
    Disconnected,
}

/// Supervises the realtime channel until shutdown or reconnect
/// exhaustion.
async fn run_channel<S, T, C>(inner: Arc<EngineInner<S, T, C>>, mut shutdown: watch::Receiver<bool>)
where
    S: OutboxStore + 'static,
    T: SyncTransport,
    C: ChannelTransport,
{
    loop {
        if *shutdown.borrow() {
            break;
        }

        inner.set_conn_state(ConnectionState::Connecting);
        match inner.channel.connect().await {
            Ok(mut conn) => {
                inner.reconnect_attempt.store(0, Ordering::SeqCst);
                inner.set_conn_state(ConnectionState::Connected);
                inner.stats.write().connects += 1;
                info!("realtime channel connected");

                let served = serve_connection(&inner, &mut conn, &mut shutdown).await;
                inner.set_conn_state(ConnectionState::Disconnected);
                if matches!(served, Served::Shutdown) {
                    break;
                }
                warn!("realtime channel disconnected");
            }
            Err(err) => {
                inner.set_conn_state(ConnectionState::Disconnected);
                let attempt = inner.reconnect_attempt.fetch_add(1, Ordering::SeqCst) + 1;
                let max = inner.config.reconnect.max_attempts;
                if attempt >= max {
                    warn!(attempt, max, "reconnect attempts exhausted, continuing with polling-only delivery");
                    return;
                }
                warn!(attempt, max, error = %err, "realtime connect failed, retrying");
            }
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(inner.config.reconnect.delay) => {}
        }
    }
    debug!("channel supervisor stopped");
}

/// Serves one live connection: flush the offline backlog, then route
/// inbound messages in arrival order, re-flushing whenever `enqueue`
/// nudges us.
async fn serve_connection<S, T, C>(
    inner: &EngineInner<S, T, C>,
    conn: &mut C::Connection,
    shutdown: &mut watch::Receiver<bool>,
) -> Served
where
    S: OutboxStore + 'static,
    T: SyncTransport,
    C: ChannelTransport,
{
    if !inner.flush_connection(conn).await {
        return Served::Disconnected;
    }

    loop {
        enum Wake {
            Shutdown,
            Flush,
            Inbound(SyncResult<Option<ChangeMessage>>),
        }

        let wake = tokio::select! {
            _ = shutdown.changed() => Wake::Shutdown,
            _ = inner.flush_notify.notified() => Wake::Flush,
            res = conn.recv() => Wake::Inbound(res),
        };

        match wake {
            Wake::Shutdown => return Served::Shutdown,
            Wake::Flush => {
                if !inner.flush_connection(conn).await {
                    return Served::Disconnected;
                }
            }
            Wake::Inbound(Ok(Some(msg))) => inner.dispatch_inbound(&msg),
            Wake::Inbound(Ok(None)) => return Served::Disconnected,
            Wake::Inbound(Err(err)) => {
                warn!(error = %err, "channel receive failed");
                return Served::Disconnected;
            }
        }
    }
}
