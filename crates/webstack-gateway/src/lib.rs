//! webstack-gateway library crate.
//!
//! Exposes a publish/subscribe [`EventBus`](webstack_core::EventBus) to web
//! browsers over HTTP and WebSocket, keyed by a cookie-backed session.
//!
//! # Architecture
//!
//! ```text
//! Browser (HTTP + JSON over WebSocket, session cookie)
//!         ↕
//! [webstack-gateway]
//!   ├── domain/           GatewayConfig, wire frames
//!   ├── application/      Sessions, per-connection bridge, HTTP publish
//!   └── infrastructure/
//!         ├── http_server/ axum router, error mapping, server lifecycle
//!         ├── ws_server/   upgrade, read loop, single writer task
//!         └── uploads/     multipart file storage
//!         ↕
//! EventBus (webstack-core)
//! ```
//!
//! # Layer rules
//!
//! - `domain` does no I/O.
//! - `application` depends on `domain` and `webstack-core`; it never touches
//!   a socket.
//! - `infrastructure` depends on all other layers plus `axum`.

/// Domain layer: configuration and wire types (no I/O).
pub mod domain;

/// Application layer: sessions and bus interaction.
pub mod application;

/// Infrastructure layer: HTTP and WebSocket serving.
pub mod infrastructure;
