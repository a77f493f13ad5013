//! JSON message types for the browser-facing protocol.
//!
//! # WebSocket frames
//!
//! Every text frame is a JSON object with a `"type"` discriminant and a
//! `"data"` body.  Browsers send:
//!
//! ```json
//! {"type":"publish","data":{"topic":"chat","payload":{"text":"hi"}}}
//! {"type":"register","data":{"topic":"chat"}}
//! {"type":"unregister","data":{"topic":"chat"}}
//! ```
//!
//! and the gateway answers with:
//!
//! ```json
//! {"type":"ack","data":{"topic":"chat","payload":{"text":"hi"},"sessionId":"..."}}
//! {"type":"event","data":{"topic":"chat","payload":{"text":"yo"},"sessionId":"..."}}
//! {"type":"error","data":"you are already registered to chat"}
//! ```
//!
//! # Why decode into a loose frame first?
//!
//! Unknown `type` values must be ignored rather than treated as malformed
//! input, and missing fields default to empty values.  So the wire shape is
//! decoded into [`ClientFrame`] (only invalid JSON fails) and then classified
//! into a [`BridgeRequest`].
//!
//! Neither [`ClientFrame`] nor [`PublishRequest`] has a session field: any
//! `sessionId` a browser sends is dropped during decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use webstack_core::Event;

// ── Browser → Gateway ─────────────────────────────────────────────────────────

/// One inbound WebSocket frame as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: FrameData,
}

/// The `data` body of an inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FrameData {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
}

/// What an inbound frame asks the bridge to do.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeRequest {
    /// Publish `payload` on `topic` on behalf of the connection's session.
    Publish { topic: String, payload: Value },
    /// Start relaying events on `topic`.
    Register { topic: String },
    /// Stop relaying events on `topic`.
    Unregister { topic: String },
    /// Any other `type`; carries the type for logging.
    Unknown(String),
}

impl From<ClientFrame> for BridgeRequest {
    fn from(frame: ClientFrame) -> Self {
        let FrameData { topic, payload } = frame.data;
        match frame.kind.as_str() {
            "publish" => Self::Publish { topic, payload },
            "register" => Self::Register { topic },
            "unregister" => Self::Unregister { topic },
            _ => Self::Unknown(frame.kind),
        }
    }
}

impl BridgeRequest {
    /// Short label for log lines; never includes the payload.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Publish { .. } => "publish",
            Self::Register { .. } => "register",
            Self::Unregister { .. } => "unregister",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Body of `POST /publish`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
}

// ── Gateway → Browser ─────────────────────────────────────────────────────────

/// Every frame the gateway writes to a WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Bus reply to one of the connection's publishes.
    Ack(Event),
    /// Delivery on a registered topic.
    Event(Event),
    /// Client-input or bus error, as human-readable text.
    Error(String),
}

impl ServerFrame {
    pub fn already_registered(topic: &str) -> Self {
        Self::Error(format!("you are already registered to {topic}"))
    }

    pub fn not_registered(topic: &str) -> Self {
        Self::Error(format!("you are not registered to {topic}"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
