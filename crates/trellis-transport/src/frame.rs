//! WebSocket text frame format.
//!
//! ```text
//! client ──▶ server   {"event": "chat/send", "data": {...}, "ack": 7}
//! server ──▶ client   {"ack": 7, "data": {...}}
//! server ──▶ client   {"event": "chat/message", "data": {...}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_framework::Outbound;

/// A frame sent by the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Inbound {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    /// Present when the client expects an acknowledgment.
    #[serde(default)]
    pub ack: Option<u64>,
}

impl Inbound {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Ack { ack: u64, data: Value },
    Emit { event: String, data: Value },
}

impl OutboundFrame {
    /// The frame for an outbound message, or `None` for a close request.
    pub fn from_outbound(message: Outbound) -> Option<Self> {
        match message {
            Outbound::Ack { id, data } => Some(Self::Ack { ack: id, data }),
            Outbound::Emit { event, data } => Some(Self::Emit { event, data }),
            Outbound::Close => None,
        }
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_optional_fields() {
        let frame = Inbound::parse(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(frame.data, Value::Null);
        assert_eq!(frame.ack, None);

        let frame = Inbound::parse(r#"{"event":"chat/send","data":{"text":"hi"},"ack":3}"#).unwrap();
        assert_eq!(frame.ack, Some(3));
        assert_eq!(frame.data, json!({ "text": "hi" }));

        assert!(Inbound::parse(r#"{"data":1}"#).is_err());
    }

    #[test]
    fn test_outbound_shapes() {
        let ack = OutboundFrame::from_outbound(Outbound::Ack {
            id: 9,
            data: json!({ "pong": true }),
        })
        .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&ack.to_text()).unwrap(),
            json!({ "ack": 9, "data": { "pong": true } })
        );

        let emit = OutboundFrame::from_outbound(Outbound::Emit {
            event: "tick".into(),
            data: json!(1),
        })
        .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&emit.to_text()).unwrap(),
            json!({ "event": "tick", "data": 1 })
        );

        assert_eq!(OutboundFrame::from_outbound(Outbound::Close), None);
    }
}
