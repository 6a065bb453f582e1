//! # Syncbox Engine
//!
//! An offline-first change-synchronization engine. Local changes are
//! sealed and persisted to a durable outbox before any delivery is
//! attempted, then pushed to a remote authority over whichever path is
//! available: a realtime duplex channel when connected, or a periodic
//! reconciliation poller otherwise. Remote changes flow back through
//! the same two paths and are routed to per-entity-type handlers.
//!
//! Delivery is at-least-once. The outbox survives process restarts
//! (given a durable [`OutboxStore`](syncbox_core::OutboxStore)
//! implementation), retries are bounded per record, and a record is
//! only marked completed after the remote side acknowledged it.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use syncbox_core::{MemoryOutbox, RootKey, StaticSecretProvider};
//! use syncbox_engine::{
//!     MockChannel, MockTransport, SyncConfig, SyncEngine,
//! };
//! use syncbox_protocol::Action;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SyncEngine::new(
//!     SyncConfig::new(),
//!     Arc::new(MemoryOutbox::new()),
//!     Arc::new(MockTransport::new()),
//!     Arc::new(MockChannel::new()),
//!     &StaticSecretProvider::new(RootKey::generate()),
//! )?;
//!
//! engine.start()?;
//! let data = serde_json::json!({"value": "dark"});
//! engine.enqueue("settings", "theme", Action::Update, Some(&data))?;
//! engine.stop().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod config;
mod dispatcher;
mod engine;
mod error;
mod http;
mod transport;

pub use channel::{ChannelConnection, ChannelTransport, ConnectionState, MockChannel};
pub use config::{ReconnectConfig, SyncConfig};
pub use dispatcher::{ChangeHandler, DispatchOutcome, Dispatcher, HandlerError};
pub use engine::{SyncEngine, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpResponse, HttpSyncTransport};
pub use transport::{MockOutcome, MockTransport, SyncTransport};
