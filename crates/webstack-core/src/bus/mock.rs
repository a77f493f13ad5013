//! Recording bus for tests.
//!
//! [`RecordingBus`] behaves like [`LocalBus`] but keeps a log of every call
//! made against it, so tests can assert how many bus operations a gateway
//! action caused.  It can also delay replies per topic and inject failures.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::local::LocalBus;
use super::{BusError, EventBus, EventCallback, SubscriptionId};
use crate::domain::event::Event;

#[derive(Default)]
struct Journal {
    published: Vec<Event>,
    subscribed: Vec<(String, SubscriptionId)>,
    unsubscribed: Vec<SubscriptionId>,
    reply_delays: HashMap<String, Duration>,
    publish_failures: HashMap<String, BusError>,
    next_subscribe_failure: Option<BusError>,
}

/// A [`LocalBus`] that records every call.
#[derive(Default)]
pub struct RecordingBus {
    inner: LocalBus,
    journal: Mutex<Journal>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying bus, for delivering events straight to subscribers.
    pub fn local(&self) -> &LocalBus {
        &self.inner
    }

    /// Every event handed to `publish`, in call order.
    pub fn published(&self) -> Vec<Event> {
        self.journal().published.clone()
    }

    /// Published events whose topic is `topic`.
    pub fn published_on(&self, topic: &str) -> Vec<Event> {
        self.journal()
            .published
            .iter()
            .filter(|e| e.topic() == topic)
            .cloned()
            .collect()
    }

    /// Topics of every successful `subscribe`, in call order.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.journal()
            .subscribed
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Handles passed to `unsubscribe`, in call order.
    pub fn unsubscribed(&self) -> Vec<SubscriptionId> {
        self.journal().unsubscribed.clone()
    }

    /// Total number of calls of any kind.
    pub fn call_count(&self) -> usize {
        let journal = self.journal();
        journal.published.len() + journal.subscribed.len() + journal.unsubscribed.len()
    }

    /// Holds back replies to publishes on `topic` for `delay`.
    pub fn delay_replies(&self, topic: &str, delay: Duration) {
        self.journal().reply_delays.insert(topic.to_string(), delay);
    }

    /// Makes every publish on `topic` fail with `error`.
    pub fn fail_publishes(&self, topic: &str, error: BusError) {
        self.journal()
            .publish_failures
            .insert(topic.to_string(), error);
    }

    /// Makes the next `subscribe` fail with `error`.
    pub fn fail_next_subscribe(&self, error: BusError) {
        self.journal().next_subscribe_failure = Some(error);
    }

    fn journal(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn publish(&self, event: Event) -> Result<Event, BusError> {
        let (delay, failure) = {
            let mut journal = self.journal();
            journal.published.push(event.clone());
            (
                journal.reply_delays.get(event.topic()).copied(),
                journal.publish_failures.get(event.topic()).cloned(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(err) => Err(err),
            None => self.inner.publish(event).await,
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        callback: EventCallback,
    ) -> Result<SubscriptionId, BusError> {
        if let Some(err) = self.journal().next_subscribe_failure.take() {
            return Err(err);
        }
        let id = self.inner.subscribe(topic, callback).await?;
        self.journal().subscribed.push((topic.to_string(), id));
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        self.journal().unsubscribed.push(id);
        self.inner.unsubscribe(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_records_each_kind_of_call() {
        let bus = RecordingBus::new();
        let id = bus.subscribe("t", Arc::new(|_| {})).await.unwrap();
        bus.publish(Event::new("t", json!(1)).unwrap()).await.unwrap();
        bus.unsubscribe(id).await.unwrap();

        assert_eq!(bus.subscribed_topics(), vec!["t".to_string()]);
        assert_eq!(bus.published().len(), 1);
        assert_eq!(bus.unsubscribed(), vec![id]);
        assert_eq!(bus.call_count(), 3);
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_one_shot() {
        let bus = RecordingBus::new();
        bus.fail_next_subscribe(BusError::Rejected("nope".into()));

        let first = bus.subscribe("t", Arc::new(|_| {})).await;
        let second = bus.subscribe("t", Arc::new(|_| {})).await;

        assert_eq!(first, Err(BusError::Rejected("nope".into())));
        assert!(second.is_ok());
        assert_eq!(bus.subscribed_topics().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_recorded_and_returned() {
        let bus = RecordingBus::new();
        bus.fail_publishes("down", BusError::Unavailable("offline".into()));

        let result = bus.publish(Event::new("down", json!(null)).unwrap()).await;

        assert_eq!(result, Err(BusError::Unavailable("offline".into())));
        assert_eq!(bus.published_on("down").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_reply_waits() {
        let bus = RecordingBus::new();
        bus.delay_replies("slow", Duration::from_secs(3));
        let started = tokio::time::Instant::now();

        bus.publish(Event::new("slow", json!(null)).unwrap())
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
