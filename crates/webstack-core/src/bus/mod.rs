//! The event-bus abstraction the gateway bridges to.
//!
//! # Callback model
//!
//! A bus delivers events asynchronously.  This module expresses that in two
//! shapes:
//!
//! - **Request/reply** – [`EventBus::publish`] is an `async fn` that resolves
//!   once the bus has processed the event and produced its reply.  Callers that
//!   must not wait (the WebSocket bridge) run it on a separate task.
//!
//! - **Streams of deliveries** – [`EventBus::subscribe`] takes an
//!   [`EventCallback`] which the bus may invoke any number of times, from any
//!   thread, possibly concurrently, until the returned [`SubscriptionId`] is
//!   passed to [`EventBus::unsubscribe`].
//!
//! Callbacks must be cheap and non-blocking; the gateway's callbacks only push
//! a frame into a channel.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::event::Event;

pub mod local;
pub mod mock;

/// Invoked by the bus for every event delivered on a subscribed topic.
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Errors reported by an [`EventBus`].
///
/// The gateway never retries on these; it forwards the `Display` text to the
/// client verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// The bus could not be reached or has shut down.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// The bus refused the operation.
    #[error("bus rejected the request: {0}")]
    Rejected(String),

    /// `unsubscribe` was called with a handle the bus does not know.
    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),
}

/// Bus-assigned handle for one active subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Publish/subscribe primitive the gateway translates browser traffic into.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes `event` and resolves with the bus's reply.
    async fn publish(&self, event: Event) -> Result<Event, BusError>;

    /// Starts delivering every event on `topic` to `callback`.
    async fn subscribe(&self, topic: &str, callback: EventCallback)
        -> Result<SubscriptionId, BusError>;

    /// Stops the deliveries of a previous [`subscribe`](EventBus::subscribe).
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError>;
}

// ── Handle allocation ─────────────────────────────────────────────────────────

/// Lock-free allocator for [`SubscriptionId`]s.
///
/// Handles start at 1 and increase by one per call, so two concurrent
/// `subscribe` calls never receive the same handle.
#[derive(Debug)]
pub struct SubscriptionCounter {
    inner: AtomicU64,
}

impl SubscriptionCounter {
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns a fresh handle.
    ///
    /// `Relaxed` is enough: the value is only used as a unique key, it does
    /// not publish any other memory.
    pub fn next(&self) -> SubscriptionId {
        SubscriptionId(self.inner.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriptionCounter {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
