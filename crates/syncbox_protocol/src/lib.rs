//! # Syncbox Protocol
//!
//! Wire message types shared by the realtime channel and the
//! request/response fallback path.
//!
//! Both transports carry the same JSON shape:
//!
//! ```json
//! { "type": "settings", "id": "theme", "action": "update", "data": { "key": "theme" } }
//! ```
//!
//! The engine treats `type`, `id` and `action` as opaque routing
//! information; `data` semantics belong entirely to the registered
//! handler for that entity type.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod message;

pub use error::{ProtocolError, ProtocolResult};
pub use message::{decode_message, decode_message_list, Action, ChangeMessage};
