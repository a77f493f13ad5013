//! Gateway configuration types.
//!
//! [`GatewayConfig`] is the single source of truth for all runtime settings.
//! It is built once in `main.rs` from CLI arguments (or environment
//! variables) and then shared read-only by every handler behind an `Arc`.
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! reads in here) lets tests build a gateway with whatever lifetimes and
//! directories they need.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// All runtime configuration for the gateway.
///
/// # Example
///
/// ```rust
/// use webstack_gateway::domain::GatewayConfig;
///
/// let cfg = GatewayConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 8080);
/// assert_eq!(cfg.cookie_name, "session");
/// ```
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the HTTP/WebSocket server binds to.
    pub bind_addr: SocketAddr,

    /// How long a session survives without renewal.
    ///
    /// Every request that resolves an existing session, and every frame on a
    /// WebSocket connection, renews it for another `session_lifetime`.
    pub session_lifetime: Duration,

    /// How often the background sweeper looks for expired sessions.
    ///
    /// A session is therefore announced as lost between `session_lifetime`
    /// and `session_lifetime + sweep_interval` after its last renewal.
    pub sweep_interval: Duration,

    /// Name of the cookie carrying the session token.
    pub cookie_name: String,

    /// Directory served under `/assets`.
    pub assets_dir: PathBuf,

    /// Directory `POST /upload` writes into.  Created on first upload.
    pub uploads_dir: PathBuf,

    /// Largest request body `POST /upload` accepts, in bytes.
    pub max_upload_bytes: usize,

    /// Serve HTTPS with this certificate instead of plain HTTP.
    pub tls: Option<TlsConfig>,
}

/// PEM certificate chain and private key for the HTTPS listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Default for GatewayConfig {
    /// | Field            | Default         |
    /// |------------------|-----------------|
    /// | bind_addr        | `0.0.0.0:8080`  |
    /// | session_lifetime | 60 seconds      |
    /// | sweep_interval   | 5 seconds       |
    /// | cookie_name      | `session`       |
    /// | assets_dir       | `./assets`      |
    /// | uploads_dir      | `./uploads`     |
    /// | max_upload_bytes | 32 MiB          |
    /// | tls              | none (HTTP)     |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            session_lifetime: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
            cookie_name: "session".to_string(),
            assets_dir: PathBuf::from("./assets"),
            uploads_dir: PathBuf::from("./uploads"),
            max_upload_bytes: 32 * 1024 * 1024,
            tls: None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
