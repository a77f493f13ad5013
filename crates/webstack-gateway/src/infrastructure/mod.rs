//! Infrastructure layer for webstack-gateway.
//!
//! Everything that speaks HTTP lives here.
//!
//! # Responsibilities
//!
//! - Binding the listener and running the axum server until shutdown
//! - Mapping [`GatewayError`](http_server::GatewayError) to status codes
//! - Upgrading `/ws` and running the per-connection read and write tasks
//! - Storing multipart uploads
//! - Serving static assets
//!
//! # What does NOT belong here?
//!
//! - Session bookkeeping and bus calls (application layer)
//! - Frame definitions (domain layer)
//! - Configuration parsing (done in `main.rs`)

pub mod http_server;
pub mod uploads;
pub mod ws_server;

pub use http_server::{router, run_server, serve, AppState, GatewayError};
