//! # webstack-core
//!
//! Shared event model and event-bus abstraction for the webstack gateway.
//!
//! The gateway exposes a backend publish/subscribe bus to web browsers.  This
//! crate holds everything both sides of that translation agree on, and has no
//! dependency on HTTP, WebSocket or cookie handling.
//!
//! # Architecture overview
//!
//! - **`domain`** – The [`Event`] unit of communication, the gateway-issued
//!   [`SessionId`] and the lifecycle topics (`session::new`,
//!   `session::lost`) the gateway announces on the bus.
//!
//! - **`bus`** – The [`EventBus`] trait (`publish`, `subscribe`,
//!   `unsubscribe`), its error type, the in-process [`LocalBus`] used by the
//!   gateway binary, and the [`RecordingBus`] test double.

pub mod bus;
pub mod domain;

// Re-export the most-used types at the crate root so callers can write
// `webstack_core::Event` instead of `webstack_core::domain::event::Event`.
pub use bus::local::LocalBus;
pub use bus::mock::RecordingBus;
pub use bus::{BusError, EventBus, EventCallback, SubscriptionId};
pub use domain::event::{Event, EventError, SessionId, SESSION_LOST_TOPIC, SESSION_NEW_TOPIC};
