use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Client -> server binary frame payload. The channel is binary-only and this
/// is the only accepted shape; anything else is a protocol violation.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InboundFrame {
    pub text: String,
}

/// Position of a single message relative to its conversation history.
/// `previous_id` is absent when the message is the earliest one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointMetadata {
    pub previous_id: Option<i64>,
}

/// Server -> client broadcast frame: the persisted message plus its point
/// metadata, serialized once per dispatch and fanned out as binary JSON.
#[derive(Debug, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub message: Message,
    pub metadata: PointMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn inbound_frame_accepts_text_only() {
        let frame: InboundFrame = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(frame.text, "hi");

        assert!(serde_json::from_str::<InboundFrame>(r#"{"text":"hi","extra":1}"#).is_err());
        assert!(serde_json::from_str::<InboundFrame>(r#"{"body":"hi"}"#).is_err());
        assert!(serde_json::from_str::<InboundFrame>("not json").is_err());
    }

    #[test]
    fn outbound_frame_wire_shape() {
        let frame = OutboundFrame {
            message: Message {
                id: 42,
                text: "hello".into(),
                sender_id: 3,
                is_read: false,
                created_at: Utc::now(),
                edited_at: None,
            },
            metadata: PointMetadata { previous_id: None },
        };

        let value: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["message"]["id"], 42);
        assert_eq!(value["message"]["text"], "hello");
        assert_eq!(value["message"]["sender_id"], 3);
        assert_eq!(value["message"]["is_read"], false);
        assert!(value["message"]["created_at"].is_string());
        // Never-edited messages leave edited_at off the wire entirely
        assert!(value["message"].get("edited_at").is_none());
        assert_eq!(value["metadata"]["previous_id"], serde_json::Value::Null);
    }
}
