//! Domain types shared by the gateway and the bus clients.
//!
//! Nothing in here performs I/O: the types can be built and inspected in any
//! test without a runtime.

pub mod event;

pub use event::{Event, EventError, SessionId, SESSION_LOST_TOPIC, SESSION_NEW_TOPIC};
