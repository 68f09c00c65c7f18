//! Wire protocol between the editor and its rendering sandboxes.
//!
//! Frames are JSON objects tagged by `type`, so a browser sandbox can
//! speak the protocol without a Rust decoder:
//!
//! ```text
//! editor ──► sandbox   {"type":"UPDATE_STORY","slides":[…],"activeIndex":2,"targetId":"pixel-7","cycle":14}
//! sandbox ──► editor   {"type":"ACK","targetId":"pixel-7","timestamp":1718000000000,"cycle":14}
//! ```
//!
//! `cycle` identifies the broadcast cycle a frame belongs to. Acks that
//! omit it are attributed to the cycle currently in flight.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use storycast_core::{EditorState, Slide};

/// State pushed to one rendering target. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    pub slides: Vec<Slide>,
    pub active_index: Option<usize>,
    /// Unset when the broadcaster drives a single target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub cycle: u64,
}

impl BroadcastMessage {
    pub fn from_state(state: &EditorState, target_id: Option<String>, cycle: u64) -> Self {
        Self {
            slides: state.slides.clone(),
            active_index: state.active_index,
            target_id,
            cycle,
        }
    }

    /// The editor state this message carries.
    pub fn state(&self) -> EditorState {
        EditorState::new(self.slides.clone(), self.active_index)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(&WireRef::UpdateStory(self))
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }
}

/// A sandbox reporting that it applied a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckMessage {
    pub target_id: String,
    /// Sandbox wall clock, epoch milliseconds. Informational only:
    /// latency is always measured on the editor's clock.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<u64>,
}

impl AckMessage {
    pub fn new(target_id: impl Into<String>, cycle: Option<u64>) -> Self {
        Self {
            target_id: target_id.into(),
            timestamp: epoch_millis(),
            cycle,
        }
    }

    /// Acknowledge `message` on behalf of `target_id`.
    pub fn for_update(message: &BroadcastMessage, target_id: impl Into<String>) -> Self {
        Self::new(target_id, Some(message.cycle))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(&WireRef::Ack(self))
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Any frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    #[serde(rename = "UPDATE_STORY")]
    UpdateStory(BroadcastMessage),
    #[serde(rename = "ACK")]
    Ack(AckMessage),
}

/// Borrowed twin of [`WireMessage`] so encoding never clones slides.
#[derive(Serialize)]
#[serde(tag = "type")]
enum WireRef<'a> {
    #[serde(rename = "UPDATE_STORY")]
    UpdateStory(&'a BroadcastMessage),
    #[serde(rename = "ACK")]
    Ack(&'a AckMessage),
}

impl WireMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        match self {
            WireMessage::UpdateStory(msg) => msg.encode(),
            WireMessage::Ack(ack) => ack.encode(),
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    pub fn into_update(self) -> Result<BroadcastMessage, ProtocolError> {
        match self {
            WireMessage::UpdateStory(msg) => Ok(msg),
            WireMessage::Ack(_) => Err(ProtocolError::InvalidMessageType),
        }
    }

    pub fn into_ack(self) -> Result<AckMessage, ProtocolError> {
        match self {
            WireMessage::Ack(ack) => Ok(ack),
            WireMessage::UpdateStory(_) => Err(ProtocolError::InvalidMessageType),
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn state() -> EditorState {
        EditorState::new(
            vec![
                Slide::with_id("a", Map::new()).set("title", "One"),
                Slide::with_id("b", Map::new()).set("title", "Two"),
            ],
            Some(1),
        )
    }

    #[test]
    fn test_update_story_wire_shape() {
        let msg = BroadcastMessage::from_state(&state(), Some("pixel-7".into()), 3);
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();

        assert_eq!(value["type"], json!("UPDATE_STORY"));
        assert_eq!(value["activeIndex"], json!(1));
        assert_eq!(value["targetId"], json!("pixel-7"));
        assert_eq!(value["cycle"], json!(3));
        assert_eq!(value["slides"][1], json!({"id": "b", "title": "Two"}));
    }

    #[test]
    fn test_single_target_message_omits_target_id() {
        let msg = BroadcastMessage::from_state(&state(), None, 1);
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert!(value.get("targetId").is_none());
    }

    #[test]
    fn test_update_story_decode_preserves_order() {
        let msg = BroadcastMessage::from_state(&state(), None, 9);
        let decoded = WireMessage::decode(&msg.encode().unwrap())
            .unwrap()
            .into_update()
            .unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.state(), state());
    }

    #[test]
    fn test_ack_decode_from_sandbox_json() {
        let text = r#"{"type":"ACK","targetId":"ipad-mini","timestamp":1718000000000}"#;
        let ack = WireMessage::decode(text).unwrap().into_ack().unwrap();
        assert_eq!(ack.target_id, "ipad-mini");
        assert_eq!(ack.timestamp, 1_718_000_000_000);
        assert_eq!(ack.cycle, None);
    }

    #[test]
    fn test_ack_for_update_carries_cycle() {
        let msg = BroadcastMessage::from_state(&state(), Some("laptop".into()), 42);
        let ack = AckMessage::for_update(&msg, "laptop");
        assert_eq!(ack.cycle, Some(42));
        assert!(ack.timestamp > 0);

        let decoded = WireMessage::decode(&ack.encode().unwrap()).unwrap();
        assert_eq!(decoded, WireMessage::Ack(ack));
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let ack = WireMessage::Ack(AckMessage::new("x", None));
        assert_eq!(ack.into_update(), Err(ProtocolError::InvalidMessageType));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(WireMessage::decode("not json").is_err());
        assert!(WireMessage::decode(r#"{"type":"RELOAD"}"#).is_err());
        assert!(WireMessage::decode(r#"{"type":"ACK"}"#).is_err());
    }
}
