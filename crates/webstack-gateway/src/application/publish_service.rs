//! Single-shot publish on behalf of an HTTP client.
//!
//! Unlike the WebSocket bridge there is no connection state: each call makes
//! exactly one bus call (or none, if the request is invalid) and waits for
//! its reply.  There is no retry and no timeout.

use thiserror::Error;
use tracing::debug;

use webstack_core::{BusError, Event, EventBus, EventError, SessionId};

use crate::domain::messages::PublishRequest;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The request could not be turned into an event.
    #[error(transparent)]
    Invalid(#[from] EventError),

    /// The bus reported a failure.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Stamps `request` with `session_id`, publishes it and returns the bus
/// reply.
///
/// # Errors
///
/// [`PublishError::Invalid`] for an empty topic (the bus is not called),
/// [`PublishError::Bus`] when the bus fails.
pub async fn publish_for_session(
    bus: &dyn EventBus,
    session_id: &SessionId,
    request: PublishRequest,
) -> Result<Event, PublishError> {
    let event = Event::new(request.topic, request.payload)?.stamped(session_id.clone());
    debug!(
        "publish event with topic '{}' for session {session_id} via http",
        event.topic()
    );
    Ok(bus.publish(event).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use webstack_core::RecordingBus;

    fn request(topic: &str) -> PublishRequest {
        PublishRequest {
            topic: topic.into(),
            payload: json!({"x": 1}),
        }
    }

    #[tokio::test]
    async fn test_reply_is_returned_and_stamped() {
        let bus = RecordingBus::new();
        let id = SessionId::new("s");

        let reply = publish_for_session(&bus, &id, request("t")).await.unwrap();

        assert_eq!(reply.session_id(), Some(&id));
        assert_eq!(reply.payload(), &json!({"x": 1}));
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_topic_makes_no_bus_call() {
        let bus = RecordingBus::new();

        let result = publish_for_session(&bus, &SessionId::new("s"), request("")).await;

        assert_eq!(result, Err(PublishError::Invalid(EventError::EmptyTopic)));
        assert_eq!(bus.call_count(), 0);
    }

    #[tokio::test]
    async fn test_bus_failure_is_not_retried() {
        let bus = RecordingBus::new();
        bus.fail_publishes("t", BusError::Unavailable("down".into()));

        let result = publish_for_session(&bus, &SessionId::new("s"), request("t")).await;

        assert_eq!(
            result,
            Err(PublishError::Bus(BusError::Unavailable("down".into())))
        );
        assert_eq!(bus.published().len(), 1);
    }
}
