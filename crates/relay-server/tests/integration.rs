//! End-to-end tests using real WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use relay_core::protocol::{ErrorPayload, NewMessagePayload};
use relay_core::{Event, EventType};
use relay_server::RelayServer;
use relay_settings::RelaySettings;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn test_settings() -> RelaySettings {
    let mut settings = RelaySettings::default();
    settings.server.port = 0;
    settings
}

/// Boot a server on an ephemeral port and return its WS URL.
async fn boot_server(settings: RelaySettings) -> (String, Arc<RelayServer>) {
    let server = Arc::new(RelayServer::new(settings));
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("ws://{addr}/ws"), server)
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url)).await.unwrap().unwrap();
    ws
}

/// Poll until `cond` holds.
async fn wait_for(cond: impl Fn() -> bool) {
    timeout(TIMEOUT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn login(ws: &mut WsStream, server: &RelayServer, name: &str) {
    send_json(ws, json!({"type": "login", "payload": {"username": name}})).await;
    wait_for(|| server.registry().lookup(name).is_some()).await;
}

/// Next event from the server, skipping control frames.
async fn recv_event(ws: &mut WsStream) -> Event {
    timeout(TIMEOUT, async {
        loop {
            match ws.next().await.expect("stream ended").expect("read failed") {
                Message::Text(text) => return Event::decode(text.as_str()).unwrap(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("unexpected message: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn recv_message(ws: &mut WsStream) -> NewMessagePayload {
    let event = recv_event(ws).await;
    assert_eq!(event.kind(), Some(EventType::NewMessage));
    event.decode_payload().unwrap()
}

async fn recv_error(ws: &mut WsStream) -> ErrorPayload {
    let event = recv_event(ws).await;
    assert_eq!(event.kind(), Some(EventType::Error));
    event.decode_payload().unwrap()
}

/// Assert nothing but control frames arrive within `wait`.
async fn assert_silent(ws: &mut WsStream, wait: Duration) {
    let result = timeout(wait, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => return other,
            }
        }
    })
    .await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

#[tokio::test]
async fn login_claims_unique_name() {
    let (url, server) = boot_server(test_settings()).await;
    let mut first = connect(&url).await;
    let mut second = connect(&url).await;

    login(&mut first, &server, "alice").await;
    send_json(&mut second, json!({"type": "login", "payload": {"username": "alice"}})).await;

    let err = recv_error(&mut second).await;
    assert_eq!(err.code, "NAME_TAKEN");
    assert_eq!(err.message, "username already taken: alice");
    assert_eq!(server.registry().named_count(), 1);
}

#[tokio::test]
async fn broadcast_reaches_every_client() {
    let (url, server) = boot_server(test_settings()).await;
    let mut alice = connect(&url).await;
    let mut bob = connect(&url).await;
    let mut lurker = connect(&url).await;
    wait_for(|| server.registry().connection_count() == 3).await;

    login(&mut alice, &server, "alice").await;
    send_json(
        &mut alice,
        json!({"type": "send_message", "payload": {"message": "hello all", "from": "alice"}}),
    )
    .await;

    for ws in [&mut alice, &mut bob, &mut lurker] {
        let msg = recv_message(ws).await;
        assert_eq!(msg.message, "hello all");
        assert_eq!(msg.from, "alice");
    }
}

#[tokio::test]
async fn private_message_reaches_target_and_sender_only() {
    let (url, server) = boot_server(test_settings()).await;
    let mut alice = connect(&url).await;
    let mut bob = connect(&url).await;
    let mut carol = connect(&url).await;
    login(&mut alice, &server, "alice").await;
    login(&mut bob, &server, "bob").await;
    login(&mut carol, &server, "carol").await;

    send_json(
        &mut alice,
        json!({"type": "private_message", "payload": {"message": "hey", "from": "alice", "to": "bob"}}),
    )
    .await;

    let to_bob = recv_message(&mut bob).await;
    let echo = recv_message(&mut alice).await;
    assert_eq!(to_bob.message, "[Private] hey");
    assert_eq!(to_bob.from, "alice");
    assert_eq!(to_bob, echo);
    assert_silent(&mut carol, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn private_message_to_unknown_user_is_reported() {
    let (url, server) = boot_server(test_settings()).await;
    let mut alice = connect(&url).await;
    login(&mut alice, &server, "alice").await;

    send_json(
        &mut alice,
        json!({"type": "private_message", "payload": {"message": "hello", "to": "nobody"}}),
    )
    .await;

    let err = recv_error(&mut alice).await;
    assert_eq!(err.code, "USER_NOT_FOUND");
}

#[tokio::test]
async fn anonymous_send_is_rejected() {
    let (url, _server) = boot_server(test_settings()).await;
    let mut anon = connect(&url).await;
    send_json(&mut anon, json!({"type": "send_message", "payload": {"message": "hi"}})).await;
    assert_eq!(recv_error(&mut anon).await.code, "NOT_LOGGED_IN");
}

#[tokio::test]
async fn malformed_frames_do_not_disconnect() {
    let (url, server) = boot_server(test_settings()).await;
    let mut ws = connect(&url).await;

    ws.send(Message::Text("{not json".to_owned().into())).await.unwrap();
    assert_eq!(recv_error(&mut ws).await.code, "DECODE_ERROR");

    send_json(&mut ws, json!({"type": "teleport", "payload": {}})).await;
    assert_eq!(recv_error(&mut ws).await.code, "UNKNOWN_EVENT_TYPE");

    login(&mut ws, &server, "still-here").await;
}

#[tokio::test]
async fn server_pings_idle_clients() {
    let mut settings = test_settings();
    settings.heartbeat.pong_wait_ms = 200;
    let (url, server) = boot_server(settings).await;
    let mut ws = connect(&url).await;

    let ping = timeout(TIMEOUT, async {
        loop {
            if let Message::Ping(_) = ws.next().await.unwrap().unwrap() {
                return;
            }
        }
    })
    .await;
    assert!(ping.is_ok());

    // Reading lets tungstenite answer pings, so the client stays registered
    assert_silent(&mut ws, Duration::from_millis(600)).await;
    assert_eq!(server.registry().connection_count(), 1);
}

#[tokio::test]
async fn unresponsive_client_is_dropped() {
    let mut settings = test_settings();
    settings.heartbeat.pong_wait_ms = 200;
    let (url, server) = boot_server(settings).await;
    let _ws = connect(&url).await;
    wait_for(|| server.registry().connection_count() == 1).await;

    // Never reading means never answering pings
    wait_for(|| server.registry().connection_count() == 0).await;
}

#[tokio::test]
async fn disallowed_origin_is_refused() {
    let mut settings = test_settings();
    settings.server.allowed_origins = Some(vec!["https://chat.example".into()]);
    let (url, server) = boot_server(settings).await;

    let mut req = url.as_str().into_client_request().unwrap();
    let _ = req
        .headers_mut()
        .insert("Origin", "https://evil.example".parse().unwrap());
    assert!(connect_async(req).await.is_err());

    let mut req = url.as_str().into_client_request().unwrap();
    let _ = req
        .headers_mut()
        .insert("Origin", "https://chat.example".parse().unwrap());
    let (_ws, _) = connect_async(req).await.unwrap();
    wait_for(|| server.registry().connection_count() == 1).await;
}

#[tokio::test]
async fn oversized_frame_closes_connection() {
    let (url, server) = boot_server(test_settings()).await;
    let mut ws = connect(&url).await;
    wait_for(|| server.registry().connection_count() == 1).await;

    let big = "x".repeat(4_096);
    send_json(&mut ws, json!({"type": "send_message", "payload": {"message": big}})).await;
    wait_for(|| server.registry().connection_count() == 0).await;
}

#[tokio::test]
async fn disconnect_releases_name() {
    let (url, server) = boot_server(test_settings()).await;
    let mut first = connect(&url).await;
    login(&mut first, &server, "alice").await;

    first.close(None).await.unwrap();
    wait_for(|| server.registry().lookup("alice").is_none()).await;

    let mut second = connect(&url).await;
    login(&mut second, &server, "alice").await;
}

#[tokio::test]
async fn shutdown_closes_clients() {
    let (url, server) = boot_server(test_settings()).await;
    let mut ws = connect(&url).await;
    wait_for(|| server.registry().connection_count() == 1).await;

    server.shutdown().shutdown();

    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    assert_eq!(server.registry().connection_count(), 0);
}
