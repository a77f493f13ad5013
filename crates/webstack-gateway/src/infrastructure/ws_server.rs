//! WebSocket endpoint: upgrade, per-connection read loop and writer task.
//!
//! Each upgraded connection runs two tasks:
//!
//! 1. **Reader** (the upgrade task itself): decodes JSON frames from the
//!    browser, renews the session and hands each request to a
//!    [`ConnectionBridge`].
//! 2. **Writer**: the only code that touches the socket's sink.  Everything
//!    destined for the browser (acks, bus events, error frames) goes through
//!    one unbounded channel, so concurrent publish replies and event
//!    callbacks never interleave a write.
//!
//! The reader stops on a close frame, a transport error, or the first frame
//! that is not valid JSON.  The bridge then cancels every bus registration
//! held by the connection.  The writer gets [`WRITER_DRAIN`] to flush frames
//! that are still queued before it is aborted.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use webstack_core::{EventBus, SessionId};

use crate::application::{ConnectionBridge, SessionManager};
use crate::domain::messages::{BridgeRequest, ClientFrame, ServerFrame};
use crate::infrastructure::http_server::{resolve, AppState, GatewayError};

/// Upper bound on flushing queued frames once a connection is closing.
pub const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Why a connection's read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The browser sent a close frame.
    ClientClosed,
    /// The stream ended without a close frame.
    StreamEnded,
    /// A frame could not be decoded as JSON.
    Malformed(String),
    /// The socket reported an error.
    Transport(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => f.write_str("closed by client"),
            Self::StreamEnded => f.write_str("stream ended"),
            Self::Malformed(e) => write!(f, "malformed frame: {e}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

// ── Upgrade ───────────────────────────────────────────────────────────────────

/// `GET /ws`
///
/// The session is resolved before upgrading so that a newly issued cookie
/// travels on the `101 Switching Protocols` response.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response, GatewayError> {
    let (jar, session_id) = resolve(&state, jar).await?;
    let sessions = Arc::clone(&state.sessions);
    let bus = Arc::clone(&state.bus);

    let upgrade = ws.on_upgrade(move |socket| handle_connection(socket, session_id, sessions, bus));
    Ok((jar, upgrade).into_response())
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Runs one upgraded connection to completion.
async fn handle_connection(
    socket: WebSocket,
    session_id: SessionId,
    sessions: Arc<SessionManager>,
    bus: Arc<dyn EventBus>,
) {
    let conn_id = Uuid::new_v4();
    info!("websocket connection {conn_id} opened for session {session_id}");

    let (sink, stream) = socket.split();
    let (outbound, inbound) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(sink, inbound, conn_id));

    let mut bridge = ConnectionBridge::new(session_id, bus, outbound);
    let reason = read_frames(stream, &mut bridge, &sessions).await;

    let session_id = bridge.session_id().clone();
    // Consumes the bridge and with it the writer's last long-lived sender.
    let cancelled = bridge.close().await;
    finish_writer(writer, WRITER_DRAIN, conn_id).await;

    match reason {
        CloseReason::ClientClosed | CloseReason::StreamEnded => info!(
            "websocket connection {conn_id} (session {session_id}) {reason}; \
             cancelled {cancelled} registration(s)"
        ),
        _ => warn!(
            "websocket connection {conn_id} (session {session_id}) {reason}; \
             cancelled {cancelled} registration(s)"
        ),
    }
}

/// Reads frames until the connection ends and applies each one to `bridge`.
///
/// Every decoded frame renews the session, whatever its type.
async fn read_frames<S>(
    mut stream: S,
    bridge: &mut ConnectionBridge,
    sessions: &SessionManager,
) -> CloseReason
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        let decoded = match message {
            Ok(Message::Text(text)) => decode_frame(text.as_str().as_bytes()),
            Ok(Message::Binary(bytes)) => decode_frame(&bytes),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => return CloseReason::ClientClosed,
            Err(e) => return CloseReason::Transport(e.to_string()),
        };

        let frame = match decoded {
            Ok(frame) => frame,
            Err(e) => {
                debug!("session {}: undecodable frame ({e})", bridge.session_id());
                return CloseReason::Malformed(e.to_string());
            }
        };

        sessions.touch(bridge.session_id());
        bridge.handle(BridgeRequest::from(frame)).await;
    }

    CloseReason::StreamEnded
}

/// Waits up to `drain` for the writer to empty its queue, then aborts it.
///
/// In-flight publish tasks still hold senders, so the queue may not close
/// on its own within the bound.
async fn finish_writer(mut writer: JoinHandle<()>, drain: Duration, conn_id: Uuid) {
    if tokio::time::timeout(drain, &mut writer).await.is_err() {
        debug!("websocket connection {conn_id}: writer still busy after {drain:?}, aborting");
        writer.abort();
    }
}

fn decode_frame(bytes: &[u8]) -> Result<ClientFrame, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Drains `frames` into `sink` until the channel closes or the socket fails.
async fn write_frames<S>(mut sink: S, mut frames: UnboundedReceiver<ServerFrame>, conn_id: Uuid)
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    while let Some(frame) = frames.recv().await {
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                error!("websocket connection {conn_id}: failed to encode frame: {e}");
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(json.into())).await {
            debug!("websocket connection {conn_id}: lost client ({e})");
            break;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
