//! webstack gateway entry point.
//!
//! Serves a web application and bridges its browsers onto an in-process
//! event bus.  Browsers publish over `POST /publish` or a WebSocket at
//! `/ws`, subscribe to topics over the same WebSocket, and are tracked by a
//! session cookie whose appearance and expiry are themselves published as
//! `session::new` / `session::lost` events.
//!
//! # Usage
//!
//! ```text
//! webstack-gateway [OPTIONS]
//!
//! Options:
//!   --bind             <IP>    Listen address [default: 0.0.0.0]
//!   --port             <PORT>  Listen port [default: 8080]
//!   --session-lifetime <SECS>  Session lifetime without renewal [default: 60]
//!   --sweep-interval   <SECS>  Expiry sweep period [default: 5]
//!   --cookie-name      <NAME>  Session cookie name [default: session]
//!   --assets           <DIR>   Directory served under /assets [default: ./assets]
//!   --uploads          <DIR>   Directory uploads are written to [default: ./uploads]
//!   --max-upload-bytes <N>     Largest accepted upload body [default: 33554432]
//!   --https                    Serve HTTPS instead of HTTP
//!   --cert             <FILE>  PEM certificate chain for --https [default: cert.pem]
//!   --key              <FILE>  PEM private key for --https [default: key.pem]
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present.
//!
//! | Variable                    | Default     |
//! |-----------------------------|-------------|
//! | `WEBSTACK_BIND`             | `0.0.0.0`   |
//! | `WEBSTACK_PORT`             | `8080`      |
//! | `WEBSTACK_SESSION_LIFETIME` | `60`        |
//! | `WEBSTACK_SWEEP_INTERVAL`   | `5`         |
//! | `WEBSTACK_COOKIE_NAME`      | `session`   |
//! | `WEBSTACK_ASSETS`           | `./assets`  |
//! | `WEBSTACK_UPLOADS`          | `./uploads` |
//! | `WEBSTACK_MAX_UPLOAD_BYTES` | `33554432`  |
//! | `WEBSTACK_HTTPS`            | `false`     |
//! | `WEBSTACK_CERT`             | `cert.pem`  |
//! | `WEBSTACK_KEY`              | `key.pem`   |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use webstack_core::LocalBus;
use webstack_gateway::domain::{GatewayConfig, TlsConfig};
use webstack_gateway::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// HTTP and WebSocket gateway onto a publish/subscribe event bus.
#[derive(Debug, Parser)]
#[command(
    name = "webstack-gateway",
    about = "HTTP and WebSocket gateway onto a publish/subscribe event bus",
    version
)]
struct Cli {
    /// IP address to listen on.
    #[arg(long, default_value = "0.0.0.0", env = "WEBSTACK_BIND")]
    bind: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 8080, env = "WEBSTACK_PORT")]
    port: u16,

    /// Seconds a session survives without any request or frame.
    #[arg(long, default_value_t = 60, env = "WEBSTACK_SESSION_LIFETIME")]
    session_lifetime: u64,

    /// Seconds between expiry sweeps.
    #[arg(long, default_value_t = 5, env = "WEBSTACK_SWEEP_INTERVAL")]
    sweep_interval: u64,

    /// Name of the session cookie.
    #[arg(long, default_value = "session", env = "WEBSTACK_COOKIE_NAME")]
    cookie_name: String,

    /// Directory served under `/assets`.
    #[arg(long, default_value = "./assets", env = "WEBSTACK_ASSETS")]
    assets: PathBuf,

    /// Directory uploads are written to.  Created on first upload.
    #[arg(long, default_value = "./uploads", env = "WEBSTACK_UPLOADS")]
    uploads: PathBuf,

    /// Largest accepted `POST /upload` body, in bytes.
    #[arg(long, default_value_t = 32 * 1024 * 1024, env = "WEBSTACK_MAX_UPLOAD_BYTES")]
    max_upload_bytes: usize,

    /// Serve HTTPS using `--cert` and `--key`.
    #[arg(long, env = "WEBSTACK_HTTPS")]
    https: bool,

    /// PEM certificate chain, read only with `--https`.
    #[arg(long, default_value = "cert.pem", env = "WEBSTACK_CERT")]
    cert: PathBuf,

    /// PEM private key, read only with `--https`.
    #[arg(long, default_value = "key.pem", env = "WEBSTACK_KEY")]
    key: PathBuf,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`GatewayConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not an IP address, either duration is
    /// zero, the cookie name is empty, or `--https` is set and the
    /// certificate or key cannot be read.
    fn into_gateway_config(self) -> anyhow::Result<GatewayConfig> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid bind address: '{}'", self.bind))?;

        if self.session_lifetime == 0 {
            bail!("--session-lifetime must be at least 1 second");
        }
        if self.sweep_interval == 0 {
            bail!("--sweep-interval must be at least 1 second");
        }
        if self.cookie_name.trim().is_empty() {
            bail!("--cookie-name must not be empty");
        }

        let tls = if self.https {
            for (flag, path) in [("--cert", &self.cert), ("--key", &self.key)] {
                std::fs::File::open(path).with_context(|| {
                    format!("{flag} '{}' is not readable", path.display())
                })?;
            }
            Some(TlsConfig {
                cert_path: self.cert,
                key_path: self.key,
            })
        } else {
            None
        };

        Ok(GatewayConfig {
            bind_addr: SocketAddr::new(ip, self.port),
            session_lifetime: Duration::from_secs(self.session_lifetime),
            sweep_interval: Duration::from_secs(self.sweep_interval),
            cookie_name: self.cookie_name,
            assets_dir: self.assets,
            uploads_dir: self.uploads,
            max_upload_bytes: self.max_upload_bytes,
            tls,
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_gateway_config()?;

    info!(
        "webstack gateway starting: addr={}, https={}, assets={}, uploads={}, session lifetime={:?}",
        config.bind_addr,
        config.tls.is_some(),
        config.assets_dir.display(),
        config.uploads_dir.display(),
        config.session_lifetime
    );

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, Arc::new(LocalBus::new()), running).await?;

    info!("webstack gateway stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
