//! WebSocket message types.
//!
//! Both directions use the same JSON shape:
//! `{"text": "...", "conversationID": "...", "userID": "..."}`.

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, UserId};
use crate::store::Message;

/// Chat message received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundFrame {
    #[serde(alias = "message")]
    pub text: String,

    #[serde(rename = "conversationID", alias = "chatID")]
    pub conversation_id: ConversationId,

    /// Author claimed by the client. Informational only: the identity bound
    /// to the connection at handshake is authoritative.
    #[serde(rename = "userID", default)]
    pub claimed_user: Option<UserId>,
}

impl InboundFrame {
    /// Decode a frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Chat message pushed to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub text: String,

    #[serde(rename = "conversationID")]
    pub conversation_id: ConversationId,

    #[serde(rename = "userID")]
    pub user_id: UserId,
}

impl OutboundFrame {
    /// Encode the frame as JSON text.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&Message> for OutboundFrame {
    fn from(message: &Message) -> Self {
        Self {
            text: message.text.clone(),
            conversation_id: message.conversation_id.clone(),
            user_id: message.author.clone(),
        }
    }
}

/// Collapse embedded line breaks to spaces and trim surrounding whitespace.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", " ").replace('\n', " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_inbound_frame() {
        let frame =
            InboundFrame::decode(br#"{"text":"hi","conversationID":"c1","userID":"alice"}"#)
                .unwrap();
        assert_eq!(frame.text, "hi");
        assert_eq!(frame.conversation_id.as_str(), "c1");
        assert_eq!(frame.claimed_user, Some(UserId::from("alice")));
    }

    #[test]
    fn test_decode_accepts_legacy_field_names_and_missing_user() {
        let frame = InboundFrame::decode(br#"{"message":"hi","chatID":"c1"}"#).unwrap();
        assert_eq!(frame.text, "hi");
        assert_eq!(frame.conversation_id.as_str(), "c1");
        assert!(frame.claimed_user.is_none());
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        assert!(InboundFrame::decode(b"not json").is_err());
        assert!(InboundFrame::decode(br#"{"text":"hi"}"#).is_err());
    }

    #[test]
    fn test_outbound_wire_shape() {
        let frame = OutboundFrame {
            text: "hello".to_string(),
            conversation_id: ConversationId::from("c1"),
            user_id: UserId::from("alice"),
        };
        let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"text": "hello", "conversationID": "c1", "userID": "alice"})
        );
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  hello  "), "hello");
        assert_eq!(normalize_text("line one\nline two"), "line one line two");
        assert_eq!(normalize_text("a\r\nb\n"), "a b");
        assert_eq!(normalize_text("\n\n"), "");
    }
}
