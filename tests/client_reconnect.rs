//! RealtimeClient behavior against live servers: queue flush ordering,
//! heartbeat latency, presence fan-out and reconnect exhaustion.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use blackonn_realtime::client::ReconnectPolicy;
use blackonn_realtime::{
    ClientConfig, ClientEvent, ConnectionState, JwtVerifier, RealtimeClient, TokenVerifier,
    WebSocketServer,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_relay() -> (Arc<WebSocketServer>, Arc<JwtVerifier>, String) {
    let verifier = Arc::new(JwtVerifier::new("test_secret".to_string(), 1));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(WebSocketServer::new(verifier.clone() as Arc<dyn TokenVerifier>));

    let accept_server = server.clone();
    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            let server = accept_server.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, peer).await;
            });
        }
    });

    (server, verifier, format!("ws://{}", addr))
}

/// Bare websocket endpoint that records every inbound text frame.
async fn start_capture_server() -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut ws = match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                while let Some(Ok(message)) = ws.next().await {
                    if let Message::Text(text) = message {
                        let _ = tx.send(text);
                    }
                }
            });
        }
    });

    (format!("ws://{}", addr), rx)
}

fn quiet_config(url: &str) -> ClientConfig {
    let mut config = ClientConfig::new(url);
    config.presence_enabled = false;
    config
}

async fn await_state(client: &RealtimeClient, wanted: ConnectionState) {
    timeout(TEST_TIMEOUT, async {
        loop {
            if client.state().await == wanted {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("client never reached {:?}", wanted));
}

#[tokio::test]
async fn test_queued_messages_flush_in_fifo_order() {
    let (url, mut received) = start_capture_server().await;
    let client = RealtimeClient::new(quiet_config(&url)).unwrap();

    // Queue while disconnected
    client.send("a", json!({"n": 1}), None).await;
    client.send("b", json!({"n": 2}), None).await;
    client.send("c", json!({"n": 3}), None).await;
    assert_eq!(client.queued_messages().await, 3);

    client.connect().await;
    await_state(&client, ConnectionState::Connected).await;

    let mut order = Vec::new();
    for _ in 0..3 {
        let text = timeout(TEST_TIMEOUT, received.recv())
            .await
            .expect("timed out")
            .expect("capture server gone");
        let value: Value = serde_json::from_str(&text).unwrap();
        order.push(value["type"].as_str().unwrap().to_string());
    }
    assert_eq!(order, vec!["a", "b", "c"]);
    assert_eq!(client.queued_messages().await, 0);
}

#[tokio::test]
async fn test_subscribe_receives_broadcasts() {
    let (server, _, url) = start_relay().await;
    let client = RealtimeClient::new(quiet_config(&url)).unwrap();

    let (hits_tx, mut hits_rx) = mpsc::unbounded_channel();
    let _sub = client
        .subscribe("order_placed", move |data| {
            let _ = hits_tx.send(data["orderId"].clone());
        })
        .await;

    client.connect().await;
    await_state(&client, ConnectionState::Connected).await;

    // The subscribe frame races the broadcast; retry until delivery
    let router = server.router();
    let order_id = timeout(TEST_TIMEOUT, async {
        loop {
            router
                .broadcast("order_placed", json!({"orderId": "o-5"}))
                .await;
            match timeout(Duration::from_millis(100), hits_rx.recv()).await {
                Ok(Some(order_id)) => return order_id,
                _ => continue,
            }
        }
    })
    .await
    .expect("callback never fired");

    assert_eq!(order_id, json!("o-5"));
}

#[tokio::test]
async fn test_heartbeat_measures_latency() {
    let (_, _, url) = start_relay().await;
    let mut config = quiet_config(&url);
    config.heartbeat_interval = Duration::from_millis(100);
    let client = RealtimeClient::new(config).unwrap();
    let mut events = client.events();

    client.connect().await;
    await_state(&client, ConnectionState::Connected).await;

    let latency = timeout(TEST_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(ClientEvent::Pong { latency_ms }) => return latency_ms,
                Ok(_) => continue,
                Err(_) => continue,
            }
        }
    })
    .await
    .expect("no pong arrived");

    assert!(latency >= 0);
    assert!(client.average_latency_ms().await > 0.0);
}

#[tokio::test]
async fn test_presence_propagates_between_clients() {
    let (_, verifier, url) = start_relay().await;

    // Watcher keeps the default empty filter, so it sees presence updates
    let watcher = RealtimeClient::new(quiet_config(&url)).unwrap();
    watcher.connect().await;
    await_state(&watcher, ConnectionState::Connected).await;

    let mut config = ClientConfig::new(&url);
    config.presence_enabled = true;
    let roamer = RealtimeClient::new(config).unwrap();
    roamer.connect().await;
    await_state(&roamer, ConnectionState::Connected).await;

    let token = verifier.issue_token("shopper-3").unwrap();
    roamer.authenticate("shopper-3", &token).await;

    // Announce after authenticating; the pre-auth online update was dropped
    roamer.set_page_visible(false).await;

    timeout(TEST_TIMEOUT, async {
        loop {
            if let Some(entry) = watcher.presence_of("shopper-3").await {
                if entry.status == blackonn_realtime::websocket::PresenceStatus::Away {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("presence update never reached the watcher");
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    // Grab a port nobody is listening on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = quiet_config(&format!("ws://{}", addr));
    config.reconnect = ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        backoff_factor: 2,
        max_delay: Duration::from_millis(50),
        max_attempts: 2,
    };
    let client = RealtimeClient::new(config).unwrap();
    let mut events = client.events();

    client.connect().await;

    let message = timeout(TEST_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(ClientEvent::Error(message)) if message.contains("exhausted") => {
                    return message
                }
                Ok(_) => continue,
                Err(_) => continue,
            }
        }
    })
    .await
    .expect("client never reported exhaustion");

    assert!(message.contains("2"));
    assert_eq!(client.state().await, ConnectionState::Disconnected);
    // Errors were counted for each failed attempt
    assert!(client.error_count() >= 2);
}
