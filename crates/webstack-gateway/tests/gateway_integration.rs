//! End-to-end tests: a real gateway on a loopback port, driven by a
//! tokio-tungstenite client, with a `RecordingBus` behind it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, SET_COOKIE};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use webstack_core::{Event, EventBus, RecordingBus, SESSION_NEW_TOPIC};
use webstack_gateway::domain::GatewayConfig;
use webstack_gateway::infrastructure::serve;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STEP: Duration = Duration::from_secs(5);

struct Gateway {
    addr: SocketAddr,
    bus: Arc<RecordingBus>,
    running: Arc<AtomicBool>,
    _dir: tempfile::TempDir,
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

async fn start_gateway() -> Gateway {
    let dir = tempfile::tempdir().unwrap();
    let config = GatewayConfig {
        assets_dir: dir.path().join("assets"),
        uploads_dir: dir.path().join("uploads"),
        ..GatewayConfig::default()
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let bus = Arc::new(RecordingBus::new());
    let running = Arc::new(AtomicBool::new(true));

    tokio::spawn(serve(listener, config, bus.clone(), Arc::clone(&running)));

    Gateway {
        addr,
        bus,
        running,
        _dir: dir,
    }
}

/// Opens `/ws`, optionally presenting a cookie.  Returns the client and the
/// `name=value` part of any Set-Cookie on the 101 response.
async fn connect(addr: SocketAddr, cookie: Option<&str>) -> (Client, Option<String>) {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    if let Some(cookie) = cookie {
        request
            .headers_mut()
            .insert(COOKIE, cookie.parse().unwrap());
    }
    let (client, response) = connect_async(request).await.unwrap();
    let set_cookie = response
        .headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string);
    (client, set_cookie)
}

async fn send(client: &mut Client, frame: Value) {
    client
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Next text frame as JSON.  Panics after five seconds without one.
async fn next_frame(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(STEP, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Polls `condition` until it holds.  Panics after five seconds.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(STEP, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ── Sessions ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_upgrade_sets_session_cookie_and_announces_session() {
    // Arrange
    let gw = start_gateway().await;

    // Act
    let (_client, cookie) = connect(gw.addr, None).await;

    // Assert
    let cookie = cookie.expect("101 response should carry the session cookie");
    assert!(cookie.starts_with("session="));
    let announced = gw.bus.published_on(SESSION_NEW_TOPIC);
    assert_eq!(announced.len(), 1);
}

#[tokio::test]
async fn test_reconnect_with_cookie_reuses_session() {
    let gw = start_gateway().await;
    let (_first, cookie) = connect(gw.addr, None).await;
    let cookie = cookie.unwrap();

    let (_second, second_cookie) = connect(gw.addr, Some(&cookie)).await;

    assert!(second_cookie.is_none());
    assert_eq!(gw.bus.published_on(SESSION_NEW_TOPIC).len(), 1);
}

// ── Publish ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_publish_is_acked_with_stamped_event() {
    // Arrange
    let gw = start_gateway().await;
    let (mut client, _) = connect(gw.addr, None).await;

    // Act
    send(
        &mut client,
        json!({"type": "publish", "data": {"topic": "chat", "payload": "hi"}}),
    )
    .await;

    // Assert
    let ack = next_frame(&mut client).await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["data"]["topic"], "chat");
    assert_eq!(ack["data"]["payload"], "hi");
    let session = gw.bus.published_on(SESSION_NEW_TOPIC)[0].payload().clone();
    assert_eq!(ack["data"]["sessionId"], session);
}

#[tokio::test]
async fn test_concurrent_publishes_ack_in_completion_order() {
    // Arrange: "slow" replies only after 300 ms.
    let gw = start_gateway().await;
    gw.bus.delay_replies("slow", Duration::from_millis(300));
    let (mut client, _) = connect(gw.addr, None).await;

    // Act
    send(&mut client, json!({"type": "publish", "data": {"topic": "slow"}})).await;
    send(&mut client, json!({"type": "publish", "data": {"topic": "fast"}})).await;

    // Assert: each request gets exactly its own ack, the fast one first.
    let first = next_frame(&mut client).await;
    let second = next_frame(&mut client).await;
    assert_eq!(first["type"], "ack");
    assert_eq!(first["data"]["topic"], "fast");
    assert_eq!(second["type"], "ack");
    assert_eq!(second["data"]["topic"], "slow");
}

#[tokio::test]
async fn test_publish_with_empty_topic_returns_error_frame() {
    let gw = start_gateway().await;
    let (mut client, _) = connect(gw.addr, None).await;

    send(&mut client, json!({"type": "publish", "data": {"payload": 1}})).await;

    let frame = next_frame(&mut client).await;
    assert_eq!(
        frame,
        json!({"type": "error", "data": "you MUST specify at least a topic for your event"})
    );
    assert_eq!(gw.bus.published().len(), 1, "only the session::new announcement");
}

// ── Register / unregister ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_registered_topic_events_are_delivered() {
    // Arrange
    let gw = start_gateway().await;
    let (mut client, _) = connect(gw.addr, None).await;
    send(&mut client, json!({"type": "register", "data": {"topic": "news"}})).await;
    let bus = gw.bus.clone();
    wait_until(|| bus.local().subscribers_of("news") == 1).await;

    // Act
    gw.bus
        .publish(Event::new("news", json!({"headline": "x"})).unwrap())
        .await
        .unwrap();

    // Assert
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "event");
    assert_eq!(frame["data"]["topic"], "news");
    assert_eq!(frame["data"]["payload"], json!({"headline": "x"}));
}

#[tokio::test]
async fn test_duplicate_register_returns_error_frame() {
    let gw = start_gateway().await;
    let (mut client, _) = connect(gw.addr, None).await;

    send(&mut client, json!({"type": "register", "data": {"topic": "news"}})).await;
    send(&mut client, json!({"type": "register", "data": {"topic": "news"}})).await;

    let frame = next_frame(&mut client).await;
    assert_eq!(
        frame,
        json!({"type": "error", "data": "you are already registered to news"})
    );
    assert_eq!(gw.bus.local().subscribers_of("news"), 1);
}

#[tokio::test]
async fn test_unregister_unknown_topic_returns_error_frame() {
    let gw = start_gateway().await;
    let (mut client, _) = connect(gw.addr, None).await;

    send(&mut client, json!({"type": "unregister", "data": {"topic": "nope"}})).await;

    let frame = next_frame(&mut client).await;
    assert_eq!(
        frame,
        json!({"type": "error", "data": "you are not registered to nope"})
    );
    assert!(gw.bus.unsubscribed().is_empty());
}

#[tokio::test]
async fn test_unregister_stops_delivery() {
    // Arrange
    let gw = start_gateway().await;
    let (mut client, _) = connect(gw.addr, None).await;
    send(&mut client, json!({"type": "register", "data": {"topic": "news"}})).await;
    send(&mut client, json!({"type": "unregister", "data": {"topic": "news"}})).await;
    let bus = gw.bus.clone();
    wait_until(|| bus.unsubscribed().len() == 1).await;

    // Act
    gw.bus
        .publish(Event::new("news", json!(1)).unwrap())
        .await
        .unwrap();
    send(&mut client, json!({"type": "publish", "data": {"topic": "marker"}})).await;

    // Assert: the next frame is the marker ack, not the news event.
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "ack");
    assert_eq!(frame["data"]["topic"], "marker");
}

// ── Connection teardown ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_close_cancels_every_registration() {
    // Arrange
    let gw = start_gateway().await;
    let (mut client, _) = connect(gw.addr, None).await;
    send(&mut client, json!({"type": "register", "data": {"topic": "a"}})).await;
    send(&mut client, json!({"type": "register", "data": {"topic": "b"}})).await;
    let bus = gw.bus.clone();
    wait_until(|| bus.local().subscription_count() == 2).await;

    // Act
    client.close(None).await.unwrap();

    // Assert: exactly two unsubscribes, nothing left on the bus.
    let bus = gw.bus.clone();
    wait_until(|| bus.local().subscription_count() == 0).await;
    assert_eq!(gw.bus.unsubscribed().len(), 2);
}

#[tokio::test]
async fn test_malformed_frame_closes_connection_and_cleans_up() {
    // Arrange
    let gw = start_gateway().await;
    let (mut client, _) = connect(gw.addr, None).await;
    send(&mut client, json!({"type": "register", "data": {"topic": "a"}})).await;
    let bus = gw.bus.clone();
    wait_until(|| bus.local().subscribers_of("a") == 1).await;

    // Act
    client
        .send(Message::Text("{definitely not json".into()))
        .await
        .unwrap();

    // Assert: the server drops the connection and cancels the registration.
    let bus = gw.bus.clone();
    wait_until(|| bus.unsubscribed().len() == 1).await;
    let ended = tokio::time::timeout(STEP, async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "connection should end after a malformed frame");
}

#[tokio::test]
async fn test_error_frame_queued_before_malformed_frame_is_delivered() {
    // Arrange
    let gw = start_gateway().await;
    let (mut client, _) = connect(gw.addr, None).await;

    // Act: the error reply is still queued when the malformed frame ends
    // the connection.
    send(&mut client, json!({"type": "unregister", "data": {"topic": "nope"}})).await;
    client
        .send(Message::Text("{definitely not json".into()))
        .await
        .unwrap();

    // Assert
    let frame = next_frame(&mut client).await;
    assert_eq!(
        frame,
        json!({"type": "error", "data": "you are not registered to nope"})
    );
}

#[tokio::test]
async fn test_frames_from_two_connections_stay_separate() {
    let gw = start_gateway().await;
    let (mut alice, _) = connect(gw.addr, None).await;
    let (mut bob, _) = connect(gw.addr, None).await;

    send(&mut alice, json!({"type": "unregister", "data": {"topic": "x"}})).await;
    send(&mut bob, json!({"type": "publish", "data": {"topic": "y"}})).await;

    assert_eq!(next_frame(&mut alice).await["type"], "error");
    assert_eq!(next_frame(&mut bob).await["type"], "ack");
    assert_eq!(gw.bus.published_on(SESSION_NEW_TOPIC).len(), 2);
}
