//! # Syncbox Core
//!
//! Durable outbox primitives and payload confidentiality for the
//! syncbox change-synchronization engine.
//!
//! This crate provides:
//! - [`ChangeRecord`] — a durable unit of pending work
//! - [`OutboxStore`] — the record-store contract, mutation by
//!   compare-and-swap on status
//! - [`MemoryOutbox`] — the in-memory reference store
//! - [`EnvelopeSealer`] — context-bound authenticated encryption for
//!   queued payloads
//!
//! ## Key invariants
//!
//! - `Completed` and `Failed` are terminal; no record transitions out
//!   of a terminal state through this crate.
//! - The store owns record lifecycle exclusively; callers mutate only
//!   through the expected-status transitions, never in place.
//! - At most one in-flight delivery attempt per record, enforced by
//!   [`OutboxStore::claim`], not by the callers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod error;
mod record;
mod store;

pub use envelope::{
    Envelope, EnvelopeSealer, RootKey, SecretProvider, StaticSecretProvider, ENVELOPE_PREFIX,
    KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE,
};
pub use error::{CoreError, CoreResult};
pub use record::{ChangeRecord, ChangeStatus, NewChange, RecordId};
pub use store::{MemoryOutbox, OutboxStore};
