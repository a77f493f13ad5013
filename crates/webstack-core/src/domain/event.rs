//! The [`Event`] type and the session identity stamped onto it.
//!
//! # JSON representation
//!
//! Events travel to browsers as JSON objects.  The session id is only present
//! once the gateway has stamped it:
//!
//! ```json
//! {"topic":"chat::message","payload":{"text":"hi"},"sessionId":"q0s3...="}
//! ```
//!
//! # Immutability
//!
//! The fields are private.  An event is built once with [`Event::new`] and the
//! only "modification" available, [`Event::stamped`], consumes the event and
//! returns a new one.  Browsers can never pick the session id themselves: the
//! gateway decodes client input into its own request types and constructs the
//! event from those.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Topic announced on the bus when the gateway issues a new session.
pub const SESSION_NEW_TOPIC: &str = "session::new";

/// Topic announced on the bus when a session expires.
pub const SESSION_LOST_TOPIC: &str = "session::lost";

/// Errors raised while constructing an [`Event`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    /// Every event needs a topic so the bus can route it.
    #[error("you MUST specify at least a topic for your event")]
    EmptyTopic,
}

// ── SessionId ─────────────────────────────────────────────────────────────────

/// Opaque, gateway-issued session token.
///
/// The gateway fills it with 256 random bits encoded as standard base64.  This
/// crate treats it as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an already-encoded token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token as it appears in the session cookie.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ── Event ─────────────────────────────────────────────────────────────────────

/// Unit of communication with the bus.
///
/// Decoding goes through the same validation as [`Event::new`], so an event
/// with an empty topic cannot be built from JSON either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireEvent")]
pub struct Event {
    topic: String,
    #[serde(default)]
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<SessionId>,
}

/// Unvalidated JSON shape of an [`Event`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    topic: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    session_id: Option<SessionId>,
}

impl TryFrom<WireEvent> for Event {
    type Error = EventError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let event = Event::new(wire.topic, wire.payload)?;
        Ok(Self {
            session_id: wire.session_id,
            ..event
        })
    }
}

impl Event {
    /// Builds an unstamped event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::EmptyTopic`] when `topic` is empty.
    pub fn new(topic: impl Into<String>, payload: Value) -> Result<Self, EventError> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(EventError::EmptyTopic);
        }
        Ok(Self {
            topic,
            payload,
            session_id: None,
        })
    }

    /// Returns the same event tagged with `session_id`, replacing any
    /// previous tag.
    #[must_use]
    pub fn stamped(self, session_id: SessionId) -> Self {
        Self {
            session_id: Some(session_id),
            ..self
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The session this event was published for, if the gateway stamped one.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
