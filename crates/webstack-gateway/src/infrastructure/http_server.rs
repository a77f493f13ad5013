//! HTTP server: routes, shared state and the single-shot handlers.
//!
//! | Route             | Handler                                   |
//! |-------------------|-------------------------------------------|
//! | `GET /`           | resolve session, redirect to the web app  |
//! | `POST /publish`   | one publish, reply is the response body   |
//! | `GET|POST /keepalive` | renew the session                     |
//! | `POST /upload`    | see [`uploads`](super::uploads)           |
//! | `GET /ws`         | see [`ws_server`](super::ws_server)       |
//! | `/assets/*`       | static files                              |
//!
//! Every handler resolves the session first.  When that creates a new
//! session the updated cookie jar is part of the response, including error
//! responses, so the browser keeps the cookie it was just issued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::LOCATION;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use thiserror::Error;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use webstack_core::{BusError, Event, EventBus, SessionId};

use crate::application::{publish_for_session, spawn_sweeper, PublishError, SessionError, SessionManager};
use crate::domain::config::{GatewayConfig, TlsConfig};
use crate::domain::messages::PublishRequest;
use crate::infrastructure::{uploads, ws_server};

/// How long open HTTPS connections get to finish once shutdown starts.
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that end an HTTP request.
///
/// Client-input errors map to `400`, resource errors to `500`, bus errors to
/// `502` with a JSON body.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("malformed payload")]
    MalformedPayload,

    #[error("you MUST specify at least a topic for your event")]
    EmptyTopic,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Bus(BusError),

    /// The upload request was unusable (bad multipart body, bad file name).
    #[error("{0}")]
    Upload(String),

    /// Writing an upload to disk failed.
    #[error("upload storage failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PublishError> for GatewayError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Invalid(_) => Self::EmptyTopic,
            PublishError::Bus(e) => Self::Bus(e),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            Self::MalformedPayload | Self::EmptyTopic | Self::Upload(_) => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            Self::Session(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {e}")).into_response()
            }
            Self::Bus(e) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response(),
            Self::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unable to create the file for writing. Check your write access privilege",
            )
                .into_response(),
        }
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

/// State shared by every handler.  Cloning is cheap (three `Arc`s).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub sessions: Arc<SessionManager>,
    pub bus: Arc<dyn EventBus>,
}

impl AppState {
    pub fn new(config: GatewayConfig, bus: Arc<dyn EventBus>) -> Self {
        let sessions = SessionManager::new(
            config.session_lifetime,
            config.cookie_name.clone(),
            Arc::clone(&bus),
        );
        Self {
            config: Arc::new(config),
            sessions: Arc::new(sessions),
            bus,
        }
    }
}

/// Builds the gateway router.
pub fn router(state: AppState) -> Router {
    let assets = ServeDir::new(&state.config.assets_dir);
    let upload_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", get(root_handler))
        .route("/publish", post(publish_handler))
        .route("/keepalive", get(keepalive_handler).post(keepalive_handler))
        .route(
            "/upload",
            post(uploads::upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/ws", get(ws_server::ws_handler))
        .nest_service("/assets", assets)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Server lifecycle ──────────────────────────────────────────────────────────

/// Binds `config.bind_addr` and serves until `running` is cleared.
///
/// Serves HTTPS when `config.tls` is set, plain HTTP otherwise.
///
/// # Errors
///
/// Returns an error if the certificate cannot be loaded, the listener
/// cannot be bound or the server fails.
pub async fn run_server(
    config: GatewayConfig,
    bus: Arc<dyn EventBus>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    if let Some(tls) = config.tls.clone() {
        return serve_tls(&tls, config, bus, running).await;
    }

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", config.bind_addr))?;

    serve(listener, config, bus, running).await
}

/// Serves on an already-bound listener until `running` is cleared.
///
/// Also owns the session sweeper, which stops together with the server.
pub async fn serve(
    listener: TcpListener,
    config: GatewayConfig,
    bus: Arc<dyn EventBus>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let local_addr = listener
        .local_addr()
        .context("listener has no local address")?;
    let (state, sweeper) = start_state(config, bus, &running);

    info!("gateway listening on http://{local_addr}");
    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(wait_for_shutdown(Arc::clone(&running)))
        .await
        .context("HTTP server failed");

    running.store(false, Ordering::Relaxed);
    sweeper.abort();
    result
}

/// HTTPS variant of [`serve`].  The certificate and key are read before
/// anything binds, so a bad path is a startup error.
async fn serve_tls(
    tls: &TlsConfig,
    config: GatewayConfig,
    bus: Arc<dyn EventBus>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    // Err only when a provider is already installed for the process.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .with_context(|| {
            format!(
                "failed to load TLS certificate '{}' and key '{}'",
                tls.cert_path.display(),
                tls.key_path.display()
            )
        })?;

    let addr = config.bind_addr;
    let (state, sweeper) = start_state(config, bus, &running);

    let handle = Handle::new();
    let shutdown = tokio::spawn({
        let handle = handle.clone();
        let running = Arc::clone(&running);
        async move {
            wait_for_shutdown(running).await;
            handle.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
        }
    });

    info!("gateway listening on https://{addr}");
    let result = axum_server::bind_rustls(addr, rustls_config)
        .handle(handle)
        .serve(router(state).into_make_service())
        .await
        .with_context(|| format!("HTTPS server on {addr} failed"));

    running.store(false, Ordering::Relaxed);
    shutdown.abort();
    sweeper.abort();
    result
}

/// Builds the shared state and starts its sweeper.
fn start_state(
    config: GatewayConfig,
    bus: Arc<dyn EventBus>,
    running: &Arc<AtomicBool>,
) -> (AppState, JoinHandle<()>) {
    let state = AppState::new(config, bus);
    let sweeper = spawn_sweeper(
        Arc::clone(&state.sessions),
        state.config.sweep_interval,
        Arc::clone(running),
    );
    (state, sweeper)
}

/// Resolves once `running` is cleared, checking every 200 ms.
async fn wait_for_shutdown(running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    info!("shutdown flag set; draining HTTP connections");
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// `POST /publish`
///
/// Holds the response until the bus replies.  The body is parsed by hand so
/// that malformed JSON is a plain `400` rather than axum's rejection.
async fn publish_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let (jar, session_id) = resolve(&state, jar).await?;
    let outcome = publish_body(&state, &session_id, &body).await;
    Ok((jar, outcome).into_response())
}

async fn publish_body(
    state: &AppState,
    session_id: &SessionId,
    body: &[u8],
) -> Result<Json<Event>, GatewayError> {
    let request: PublishRequest = serde_json::from_slice(body).map_err(|e| {
        warn!("error while decoding event from http-publish-request body: {e}");
        GatewayError::MalformedPayload
    })?;

    match publish_for_session(state.bus.as_ref(), session_id, request).await {
        Ok(reply) => Ok(Json(reply)),
        Err(e) => {
            warn!("http publish for session {session_id} failed: {e}");
            Err(e.into())
        }
    }
}

/// `GET|POST /keepalive`
async fn keepalive_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), GatewayError> {
    let (jar, _session_id) = resolve(&state, jar).await?;
    Ok((jar, StatusCode::NO_CONTENT))
}

/// `GET /`
async fn root_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response, GatewayError> {
    let (jar, _session_id) = resolve(&state, jar).await?;
    Ok((
        StatusCode::MOVED_PERMANENTLY,
        jar,
        [(LOCATION, "/assets/index.html")],
    )
        .into_response())
}

/// Resolves the request's session, logging failures.
pub(crate) async fn resolve(
    state: &AppState,
    jar: CookieJar,
) -> Result<(CookieJar, SessionId), GatewayError> {
    state.sessions.resolve(jar).await.map_err(|e| {
        error!("error in session handling ({e})");
        GatewayError::Session(e)
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
