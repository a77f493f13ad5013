//! Per-connection bridge between one WebSocket and the event bus.
//!
//! A [`ConnectionBridge`] owns the state of one browser connection:
//!
//! ```text
//! { session_id, registrations: topic -> SubscriptionId }
//! ```
//!
//! It starts with the session resolved at handshake time and no
//! registrations, applies one [`BridgeRequest`] at a time from the read
//! loop, and ends with [`ConnectionBridge::close`], which unsubscribes every
//! remaining registration.
//!
//! # Output
//!
//! The bridge never writes to the socket.  Every frame it produces, whether
//! from the read loop, a publish reply or a bus delivery, is pushed into the
//! connection's outbound channel.  The infrastructure layer drains that
//! channel from a single writer task, so frames are never interleaved.
//!
//! Bus callbacks hold a clone of the channel sender only.  They never see the
//! registration map, which is mutated exclusively by the read loop.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use webstack_core::{Event, EventBus, EventCallback, EventError, SessionId, SubscriptionId};

use crate::domain::messages::{BridgeRequest, ServerFrame};

/// Sending half of a connection's outbound frame queue.
pub type FrameSender = UnboundedSender<ServerFrame>;

/// Connection-scoped bridge state.
pub struct ConnectionBridge {
    session_id: SessionId,
    bus: Arc<dyn EventBus>,
    outbound: FrameSender,
    registrations: HashMap<String, SubscriptionId>,
}

impl ConnectionBridge {
    pub fn new(session_id: SessionId, bus: Arc<dyn EventBus>, outbound: FrameSender) -> Self {
        Self {
            session_id,
            bus,
            outbound,
            registrations: HashMap::new(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Whether this connection currently relays `topic`.
    pub fn is_registered(&self, topic: &str) -> bool {
        self.registrations.contains_key(topic)
    }

    /// Number of active registrations.
    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    /// Applies one inbound request.
    ///
    /// Publishes return as soon as the bus call has been handed to its own
    /// task; registrations and unregistrations wait for the bus.
    pub async fn handle(&mut self, request: BridgeRequest) {
        match request {
            BridgeRequest::Publish { topic, payload } => self.publish(topic, payload),
            BridgeRequest::Register { topic } => self.register(topic).await,
            BridgeRequest::Unregister { topic } => self.unregister(topic).await,
            BridgeRequest::Unknown(kind) => {
                debug!("session {}: ignoring frame of type '{kind}'", self.session_id);
            }
        }
    }

    fn publish(&self, topic: String, payload: Value) {
        let event = match Event::new(topic, payload) {
            Ok(event) => event.stamped(self.session_id.clone()),
            Err(e) => {
                warn!("session {}: rejected publish: {e}", self.session_id);
                self.send(ServerFrame::Error(e.to_string()));
                return;
            }
        };

        debug!(
            "publish event with topic '{}' for session {} via websocket",
            event.topic(),
            self.session_id
        );

        // Replies are written in completion order, not request order.
        let bus = Arc::clone(&self.bus);
        let outbound = self.outbound.clone();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            let frame = match bus.publish(event).await {
                Ok(reply) => ServerFrame::Ack(reply),
                Err(e) => {
                    warn!("session {session_id}: publish failed: {e}");
                    ServerFrame::Error(e.to_string())
                }
            };
            if outbound.send(frame).is_err() {
                debug!("session {session_id}: connection gone before publish reply");
            }
        });
    }

    async fn register(&mut self, topic: String) {
        if topic.is_empty() {
            warn!("session {}: rejected register without topic", self.session_id);
            self.send(ServerFrame::Error(EventError::EmptyTopic.to_string()));
            return;
        }

        if self.registrations.contains_key(&topic) {
            warn!(
                "failed registering session {} to topic '{topic}' (already registered)",
                self.session_id
            );
            self.send(ServerFrame::already_registered(&topic));
            return;
        }

        let outbound = self.outbound.clone();
        let callback: EventCallback = Arc::new(move |event| {
            // A closed channel means the connection is shutting down; its
            // subscriptions are about to be cancelled.
            let _ = outbound.send(ServerFrame::Event(event));
        });

        match self.bus.subscribe(&topic, callback).await {
            Ok(id) => {
                info!(
                    "registered session {} to topic '{topic}' ({id})",
                    self.session_id
                );
                self.registrations.insert(topic, id);
            }
            Err(e) => {
                warn!(
                    "failed registering session {} to topic '{topic}' ({e})",
                    self.session_id
                );
                self.send(ServerFrame::Error(e.to_string()));
            }
        }
    }

    async fn unregister(&mut self, topic: String) {
        let Some(id) = self.registrations.remove(&topic) else {
            warn!(
                "error unregistering session {} from topic '{topic}' (not registered)",
                self.session_id
            );
            self.send(ServerFrame::not_registered(&topic));
            return;
        };

        match self.bus.unsubscribe(id).await {
            Ok(()) => info!(
                "unregistered session {} from topic '{topic}'",
                self.session_id
            ),
            Err(e) => {
                warn!(
                    "error unregistering session {} from topic '{topic}' ({e})",
                    self.session_id
                );
                self.send(ServerFrame::Error(e.to_string()));
            }
        }
    }

    /// Cancels every remaining registration on the bus.
    ///
    /// Each `unsubscribe` is awaited before this returns, so once the caller
    /// releases the connection nothing on the bus still points at it.
    /// Returns the number of registrations that were torn down.
    pub async fn close(mut self) -> usize {
        let registrations: Vec<(String, SubscriptionId)> = self.registrations.drain().collect();
        let count = registrations.len();

        for (topic, id) in registrations {
            if let Err(e) = self.bus.unsubscribe(id).await {
                warn!(
                    "session {}: failed to cancel registration on '{topic}' ({e})",
                    self.session_id
                );
            }
        }

        if count > 0 {
            debug!(
                "session {}: cancelled {count} registration(s) on close",
                self.session_id
            );
        }
        count
    }

    fn send(&self, frame: ServerFrame) {
        if self.outbound.send(frame).is_err() {
            debug!("session {}: outbound queue closed", self.session_id);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
