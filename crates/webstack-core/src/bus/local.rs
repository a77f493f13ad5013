//! In-process event bus.
//!
//! [`LocalBus`] lets the gateway run without an external broker: publishing
//! an event hands it to every subscriber of exactly that topic and replies
//! with the event itself.
//!
//! Subscriber callbacks are collected under the lock and invoked after it has
//! been released, so a callback may safely call back into the bus.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{BusError, EventBus, EventCallback, SubscriptionCounter, SubscriptionId};
use crate::domain::event::Event;

struct Subscriber {
    topic: String,
    callback: EventCallback,
}

/// Topic-routed, in-memory [`EventBus`].
#[derive(Default)]
pub struct LocalBus {
    ids: SubscriptionCounter,
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions across all topics.
    pub fn subscription_count(&self) -> usize {
        self.lock().len()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscribers_of(&self, topic: &str) -> usize {
        self.lock().values().filter(|s| s.topic == topic).count()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Subscriber>> {
        // Callbacks run outside the lock, so a poisoned map is still consistent.
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, event: Event) -> Result<Event, BusError> {
        let callbacks: Vec<EventCallback> = self
            .lock()
            .values()
            .filter(|s| s.topic == event.topic())
            .map(|s| s.callback.clone())
            .collect();

        debug!(
            "local bus: delivering '{}' to {} subscriber(s)",
            event.topic(),
            callbacks.len()
        );

        for callback in callbacks {
            callback(event.clone());
        }
        Ok(event)
    }

    async fn subscribe(
        &self,
        topic: &str,
        callback: EventCallback,
    ) -> Result<SubscriptionId, BusError> {
        let id = self.ids.next();
        self.lock().insert(
            id,
            Subscriber {
                topic: topic.to_string(),
                callback,
            },
        );
        debug!("local bus: subscription {id} on '{topic}'");
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        match self.lock().remove(&id) {
            Some(sub) => {
                debug!("local bus: removed subscription {id} on '{}'", sub.topic);
                Ok(())
            }
            None => Err(BusError::UnknownSubscription(id)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn collector() -> (EventCallback, Arc<Mutex<Vec<Event>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: EventCallback = Arc::new(move |event| sink.lock().unwrap().push(event));
        (callback, seen)
    }

    #[tokio::test]
    async fn test_publish_replies_with_the_event() {
        let bus = LocalBus::new();
        let event = Event::new("t", json!({"x": 1})).unwrap();

        let reply = bus.publish(event.clone()).await.unwrap();

        assert_eq!(reply, event);
    }

    #[tokio::test]
    async fn test_publish_delivers_only_to_matching_topic() {
        // Arrange
        let bus = LocalBus::new();
        let (on_a, seen_a) = collector();
        let (on_b, seen_b) = collector();
        bus.subscribe("a", on_a).await.unwrap();
        bus.subscribe("b", on_b).await.unwrap();

        // Act
        bus.publish(Event::new("a", json!(1)).unwrap()).await.unwrap();

        // Assert
        assert_eq!(seen_a.lock().unwrap().len(), 1);
        assert!(seen_b.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = LocalBus::new();
        let (callback, seen) = collector();
        let id = bus.subscribe("t", callback).await.unwrap();

        bus.unsubscribe(id).await.unwrap();
        bus.publish(Event::new("t", json!(1)).unwrap()).await.unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_id_fails() {
        let bus = LocalBus::new();
        let result = bus.unsubscribe(SubscriptionId::new(42)).await;
        assert_eq!(
            result,
            Err(BusError::UnknownSubscription(SubscriptionId::new(42)))
        );
    }

    #[tokio::test]
    async fn test_subscribers_of_counts_per_topic() {
        let bus = LocalBus::new();
        let (c1, _) = collector();
        let (c2, _) = collector();
        let (c3, _) = collector();
        bus.subscribe("a", c1).await.unwrap();
        bus.subscribe("a", c2).await.unwrap();
        bus.subscribe("b", c3).await.unwrap();

        assert_eq!(bus.subscribers_of("a"), 2);
        assert_eq!(bus.subscribers_of("b"), 1);
        assert_eq!(bus.subscription_count(), 3);
    }
}
