//! Domain layer for webstack-gateway.
//!
//! Pure types with no I/O: the runtime configuration and the JSON "language"
//! spoken between browsers and the gateway.  Everything here can be built and
//! inspected in a plain `#[test]`.

pub mod config;
pub mod messages;

pub use config::{GatewayConfig, TlsConfig};
pub use messages::{BridgeRequest, ClientFrame, FrameData, PublishRequest, ServerFrame};
