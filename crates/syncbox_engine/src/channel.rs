//! Realtime duplex channel abstraction.
//!
//! The channel is a latency optimization, never a correctness
//! requirement: when it is down, the reconciliation poller still
//! delivers everything. The engine supervises connections, applying a
//! fixed-delay reconnect policy bounded by a maximum attempt count,
//! after which it degrades gracefully to polling-only delivery.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use syncbox_protocol::ChangeMessage;
use tokio::sync::mpsc;

/// Connection state of the realtime channel. Ephemeral, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection; either idle, between retries, or given up.
    #[default]
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// The duplex connection is live.
    Connected,
}

/// Factory for duplex connections to the remote authority.
pub trait ChannelTransport: Send + Sync + 'static {
    /// The live connection type.
    type Connection: ChannelConnection + 'static;

    /// Establishes a new duplex connection.
    fn connect(&self) -> impl Future<Output = SyncResult<Self::Connection>> + Send;
}

/// A live duplex connection.
pub trait ChannelConnection: Send {
    /// Sends one change message to the remote side.
    fn send(&mut self, msg: &ChangeMessage) -> impl Future<Output = SyncResult<()>> + Send;

    /// Waits for the next inbound message.
    ///
    /// Returns `Ok(None)` when the remote side closed the connection.
    /// Must be cancel-safe: the engine races it against its flush and
    /// shutdown signals.
    fn recv(&mut self) -> impl Future<Output = SyncResult<Option<ChangeMessage>>> + Send;
}

/// A scriptable in-process channel for tests.
///
/// Each successful connect yields a connection whose outbound messages
/// land in a shared log. Inbound messages are injected through
/// [`MockChannel::inbound_sender`]; the sender feeds the first
/// successful connection, and dropping it closes that connection.
pub struct MockChannel {
    refuse_connects: AtomicBool,
    connect_attempts: AtomicU32,
    sent: Arc<Mutex<Vec<ChangeMessage>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<ChangeMessage>>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<ChangeMessage>>>,
    fail_sends: AtomicBool,
}

impl MockChannel {
    /// Creates a channel that accepts connections.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            refuse_connects: AtomicBool::new(false),
            connect_attempts: AtomicU32::new(0),
            sent: Arc::new(Mutex::new(Vec::new())),
            inbound_rx: Mutex::new(Some(rx)),
            inbound_tx: Mutex::new(Some(tx)),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Creates a channel that refuses every connect.
    pub fn refusing() -> Self {
        let channel = Self::new();
        channel.refuse_connects.store(true, Ordering::SeqCst);
        channel
    }

    /// Makes future connects fail (or succeed again).
    pub fn set_refuse_connects(&self, refuse: bool) {
        self.refuse_connects.store(refuse, Ordering::SeqCst);
    }

    /// Makes sends on live connections fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Number of connect attempts observed, successful or not.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Messages sent over any connection so far.
    pub fn sent(&self) -> Vec<ChangeMessage> {
        self.sent.lock().clone()
    }

    /// Takes the inbound injection handle. Dropping it closes the
    /// connection that consumed the paired receiver.
    pub fn inbound_sender(&self) -> Option<mpsc::UnboundedSender<ChangeMessage>> {
        self.inbound_tx.lock().take()
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// A live connection produced by [`MockChannel`].
pub struct MockConnection {
    sent: Arc<Mutex<Vec<ChangeMessage>>>,
    inbound: Option<mpsc::UnboundedReceiver<ChangeMessage>>,
    fail_sends: bool,
}

impl ChannelTransport for MockChannel {
    type Connection = MockConnection;

    fn connect(&self) -> impl Future<Output = SyncResult<Self::Connection>> + Send {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self.refuse_connects.load(Ordering::SeqCst);
        let connection = if refused {
            None
        } else {
            Some(MockConnection {
                sent: Arc::clone(&self.sent),
                inbound: self.inbound_rx.lock().take(),
                fail_sends: self.fail_sends.load(Ordering::SeqCst),
            })
        };

        async move { connection.ok_or(SyncError::NotConnected) }
    }
}

impl ChannelConnection for MockConnection {
    fn send(&mut self, msg: &ChangeMessage) -> impl Future<Output = SyncResult<()>> + Send {
        let result = if self.fail_sends {
            Err(SyncError::transport_retryable("send failed"))
        } else {
            self.sent.lock().push(msg.clone());
            Ok(())
        };
        async move { result }
    }

    fn recv(&mut self) -> impl Future<Output = SyncResult<Option<ChangeMessage>>> + Send {
        let inbound = self.inbound.as_mut();
        async move {
            match inbound {
                Some(rx) => Ok(rx.recv().await),
                // A connection without an inbound feed stays open and
                // silent until shutdown.
                None => std::future::pending().await,
            }
        }
    }
}
