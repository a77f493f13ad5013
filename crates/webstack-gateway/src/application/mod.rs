//! Application layer for webstack-gateway.
//!
//! Knows *what* the gateway does with a session or a frame, but not how bytes
//! reach a socket.
//!
//! # Responsibilities
//!
//! - Issuing, renewing and expiring sessions (`session_manager`)
//! - Applying WebSocket requests to the bus for one connection (`bridge_service`)
//! - Single-shot HTTP publishes (`publish_service`)
//!
//! # What does NOT belong here?
//!
//! - Routing, upgrades and response encoding (infrastructure)
//! - Writing to sockets: the bridge only pushes frames into a channel

pub mod bridge_service;
pub mod publish_service;
pub mod session_manager;

pub use bridge_service::{ConnectionBridge, FrameSender};
pub use publish_service::{publish_for_session, PublishError};
pub use session_manager::{spawn_sweeper, SessionError, SessionManager, TokenSource};
