//! Change messages exchanged with the remote authority.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// The action a change applies to its entity.
///
/// Semantics are owned by the handler registered for the entity type,
/// not by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// A new entity was created.
    Create,
    /// An existing entity was modified.
    Update,
    /// An entity was removed.
    Delete,
    /// A one-shot command to run on the receiving side.
    Execute,
}

impl Action {
    /// Returns the wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Execute => "execute",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single change message.
///
/// This is the unit carried over both the duplex channel and the
/// request/response fallback. `data` holds the decrypted JSON payload,
/// or `null` for payload-less changes (e.g. deletes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMessage {
    /// Logical entity type; also the dispatch key and the encryption
    /// context for any sealed payload.
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Identifier of the affected entity within its type.
    #[serde(rename = "id")]
    pub entity_id: String,
    /// What happened to the entity.
    pub action: Action,
    /// Payload for the handler, or `None`.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl ChangeMessage {
    /// Creates a new change message.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: Action,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action,
            data,
        }
    }

    /// Serializes the message to its JSON wire form.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encoding(e.to_string()))
    }

    /// Validates routing fields beyond what serde enforces.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.entity_type.is_empty() {
            return Err(ProtocolError::Validation("empty entity type".into()));
        }
        if self.entity_id.is_empty() {
            return Err(ProtocolError::Validation("empty entity id".into()));
        }
        Ok(())
    }
}

/// Decodes a single change message from its JSON wire form.
pub fn decode_message(bytes: &[u8]) -> ProtocolResult<ChangeMessage> {
    let msg: ChangeMessage = serde_json::from_slice(bytes)?;
    msg.validate()?;
    Ok(msg)
}

/// Decodes an array of change messages, as returned by the pull endpoint.
pub fn decode_message_list(bytes: &[u8]) -> ProtocolResult<Vec<ChangeMessage>> {
    let msgs: Vec<ChangeMessage> = serde_json::from_slice(bytes)?;
    for msg in &msgs {
        msg.validate()?;
    }
    Ok(msgs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_field_names() {
        let msg = ChangeMessage::new(
            "settings",
            "theme",
            Action::Update,
            Some(json!({"key": "theme", "value": "dark"})),
        );

        let encoded = msg.encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(value["type"], "settings");
        assert_eq!(value["id"], "theme");
        assert_eq!(value["action"], "update");
        assert_eq!(value["data"]["value"], "dark");
    }

    #[test]
    fn null_data_roundtrip() {
        let msg = ChangeMessage::new("settings", "theme", Action::Delete, None);
        let decoded = decode_message(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.data.is_none());
    }

    #[test]
    fn missing_data_field_defaults_to_none() {
        let raw = br#"{"type":"command","id":"restart","action":"execute"}"#;
        let msg = decode_message(raw).unwrap();
        assert_eq!(msg.action, Action::Execute);
        assert!(msg.data.is_none());
    }

    #[test]
    fn unknown_action_rejected() {
        let raw = br#"{"type":"settings","id":"x","action":"merge","data":null}"#;
        assert!(matches!(
            decode_message(raw),
            Err(ProtocolError::Validation(_))
        ));
    }

    #[test]
    fn missing_type_rejected() {
        let raw = br#"{"id":"x","action":"update","data":null}"#;
        assert!(decode_message(raw).is_err());
    }

    #[test]
    fn empty_routing_fields_rejected() {
        let raw = br#"{"type":"","id":"x","action":"update"}"#;
        assert!(matches!(
            decode_message(raw),
            Err(ProtocolError::Validation(_))
        ));

        let raw = br#"{"type":"settings","id":"","action":"update"}"#;
        assert!(decode_message(raw).is_err());
    }

    #[test]
    fn not_json_rejected() {
        assert!(decode_message(b"not json at all").is_err());
    }

    #[test]
    fn message_list_decoding() {
        let raw = br#"[
            {"type":"settings","id":"a","action":"update","data":{"v":1}},
            {"type":"automation","id":"b","action":"create","data":{"v":2}}
        ]"#;
        let msgs = decode_message_list(raw).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].entity_type, "settings");
        assert_eq!(msgs[1].action, Action::Create);
    }

    #[test]
    fn message_list_rejects_invalid_member() {
        let raw = br#"[{"type":"","id":"a","action":"update"}]"#;
        assert!(decode_message_list(raw).is_err());
    }

    #[test]
    fn action_names() {
        assert_eq!(Action::Create.as_str(), "create");
        assert_eq!(Action::Execute.to_string(), "execute");
    }
}
