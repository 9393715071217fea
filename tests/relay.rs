//! End-to-end relay tests over real websocket connections.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use blackonn_realtime::{JwtVerifier, TokenVerifier, WebSocketServer};

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE_WINDOW: Duration = Duration::from_millis(200);

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_server(verifier: Arc<dyn TokenVerifier>) -> (Arc<WebSocketServer>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(WebSocketServer::new(verifier));

    let accept_server = server.clone();
    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            let server = accept_server.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, peer).await;
            });
        }
    });

    (server, format!("ws://{}", addr))
}

fn test_verifier() -> Arc<JwtVerifier> {
    Arc::new(JwtVerifier::new("test_secret".to_string(), 1))
}

async fn connect(url: &str) -> WsClient {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Next text frame as JSON; panics if nothing arrives in time.
async fn next_frame(ws: &mut WsClient) -> Value {
    timeout(FRAME_TIMEOUT, async {
        loop {
            match ws.next().await.expect("connection ended") {
                Ok(Message::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Ok(_) => continue,
                Err(e) => panic!("websocket error: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

async fn assert_silent(ws: &mut WsClient) {
    let outcome = timeout(SILENCE_WINDOW, ws.next()).await;
    assert!(outcome.is_err(), "expected no frame, got {:?}", outcome);
}

async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_connected_greeting() {
    let (_, url) = start_server(test_verifier()).await;
    let mut ws = connect(&url).await;

    let hello = next_frame(&mut ws).await;
    assert_eq!(hello["type"], "connected");
    assert!(hello["connectionId"].is_string());
    assert!(hello["timestamp"].is_i64());
}

#[tokio::test]
async fn test_ping_pong_echoes_timestamp() {
    let (_, url) = start_server(test_verifier()).await;
    let mut ws = connect(&url).await;
    next_frame(&mut ws).await; // connected

    send_json(&mut ws, json!({"type": "ping", "payload": {"timestamp": 1000}})).await;

    let pong = next_frame(&mut ws).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["timestamp"], 1000);

    // Client-side latency derivation from the echoed timestamp
    let latency = chrono::Utc::now().timestamp_millis() - pong["timestamp"].as_i64().unwrap();
    assert!(latency > 0);
}

#[tokio::test]
async fn test_authenticate_and_direct_send() {
    let verifier = test_verifier();
    let token = verifier.issue_token("admin-1").unwrap();
    let (server, url) = start_server(verifier).await;

    let mut ws = connect(&url).await;
    next_frame(&mut ws).await; // connected

    send_json(
        &mut ws,
        json!({"type": "authenticate", "payload": {"userId": "admin-1", "token": token}}),
    )
    .await;

    let ack = next_frame(&mut ws).await;
    assert_eq!(ack["type"], "authenticated");
    assert_eq!(ack["userId"], "admin-1");

    // The storefront can now reach this user directly
    let router = server.router();
    assert!(
        router
            .send_to_user("admin-1", "order_placed", json!({"orderId": "o-77"}))
            .await
    );

    let event = next_frame(&mut ws).await;
    assert_eq!(event["type"], "order_placed");
    assert_eq!(event["data"]["orderId"], "o-77");

    // Unknown users are a silent no-op
    assert!(!router.send_to_user("nobody", "order_placed", json!({})).await);
}

#[tokio::test]
async fn test_bad_token_is_rejected_softly() {
    let (_, url) = start_server(test_verifier()).await;
    let mut ws = connect(&url).await;
    next_frame(&mut ws).await;

    send_json(
        &mut ws,
        json!({"type": "authenticate", "payload": {"token": "forged"}}),
    )
    .await;

    let reply = next_frame(&mut ws).await;
    assert_eq!(reply["type"], "error");

    // Connection survives the rejection
    send_json(&mut ws, json!({"type": "ping", "payload": {"timestamp": 7}})).await;
    assert_eq!(next_frame(&mut ws).await["type"], "pong");
}

#[test_log::test(tokio::test)]
async fn test_room_join_broadcast_and_leave() {
    let (server, url) = start_server(test_verifier()).await;
    let router = server.router();

    let mut alice = connect(&url).await;
    let mut bob = connect(&url).await;
    next_frame(&mut alice).await;
    next_frame(&mut bob).await;

    send_json(&mut alice, json!({"type": "join_room", "payload": {"roomId": "admins"}})).await;
    send_json(&mut bob, json!({"type": "join_room", "payload": {"roomId": "admins"}})).await;
    assert_eq!(next_frame(&mut alice).await["type"], "room_joined");
    assert_eq!(next_frame(&mut bob).await["type"], "room_joined");

    let delivered = router
        .broadcast_to_room("admins", "order_placed", json!({"orderId": "o-1"}))
        .await;
    assert_eq!(delivered, 2);
    assert_eq!(next_frame(&mut alice).await["type"], "order_placed");
    assert_eq!(next_frame(&mut bob).await["type"], "order_placed");

    // Bob leaves; subsequent room broadcasts skip him
    send_json(&mut bob, json!({"type": "leave_room", "payload": {"roomId": "admins"}})).await;
    assert_eq!(next_frame(&mut bob).await["type"], "room_left");

    let delivered = router
        .broadcast_to_room("admins", "stock_alert", json!({}))
        .await;
    assert_eq!(delivered, 1);
    assert_eq!(next_frame(&mut alice).await["type"], "stock_alert");
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn test_subscription_filter_end_to_end() {
    let (server, url) = start_server(test_verifier()).await;
    let router = server.router();

    let mut filtered = connect(&url).await;
    next_frame(&mut filtered).await;

    send_json(
        &mut filtered,
        json!({"type": "subscribe", "payload": {"events": ["stock_alert"]}}),
    )
    .await;
    assert_eq!(next_frame(&mut filtered).await["type"], "subscribed");

    router.broadcast("order_placed", json!({})).await;
    assert_silent(&mut filtered).await;

    router.broadcast("stock_alert", json!({"sku": "B-12"})).await;
    let event = next_frame(&mut filtered).await;
    assert_eq!(event["type"], "stock_alert");
    assert_eq!(event["data"]["sku"], "B-12");
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let (server, url) = start_server(test_verifier()).await;
    let mut ws = connect(&url).await;
    next_frame(&mut ws).await;

    ws.send(Message::Text("{definitely not json".to_string()))
        .await
        .unwrap();

    let reply = next_frame(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid message format"));

    send_json(&mut ws, json!({"type": "ping", "payload": {"timestamp": 1}})).await;
    assert_eq!(next_frame(&mut ws).await["type"], "pong");

    assert_eq!(server.router().stats().total_errors(), 1);
}

#[tokio::test]
async fn test_close_cleans_up_registries() {
    let verifier = test_verifier();
    let token = verifier.issue_token("user-1").unwrap();
    let (server, url) = start_server(verifier).await;
    let router = server.router();

    let mut ws = connect(&url).await;
    next_frame(&mut ws).await;
    send_json(
        &mut ws,
        json!({"type": "authenticate", "payload": {"token": token}}),
    )
    .await;
    next_frame(&mut ws).await;
    send_json(&mut ws, json!({"type": "join_room", "payload": {"roomId": "admins"}})).await;
    next_frame(&mut ws).await;

    let snapshot = router.snapshot().await;
    assert_eq!(snapshot.active_connections, 1);
    assert_eq!(snapshot.room_count, 1);

    ws.close(None).await.unwrap();

    // Cleanup is asynchronous; poll until it lands
    timeout(FRAME_TIMEOUT, async {
        loop {
            let snapshot = router.snapshot().await;
            if snapshot.active_connections == 0 && snapshot.room_count == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("registries were not cleaned up after close");

    assert!(!router.send_to_user("user-1", "order_placed", json!({})).await);
}
