use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::TokenVerifier;
use crate::websocket::protocol::{now_millis, ServerFrame};
use crate::websocket::MessageRouter;

/// Raw-TCP websocket acceptor. One writer task per connection, fed by an
/// unbounded channel held in the connection registry; inbound frames are
/// routed synchronously in the receive loop, so registry mutation is
/// serialized per connection.
pub struct WebSocketServer {
    router: Arc<MessageRouter>,
}

impl WebSocketServer {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            router: Arc::new(MessageRouter::new(verifier)),
        }
    }

    pub fn router(&self) -> Arc<MessageRouter> {
        self.router.clone()
    }

    pub async fn handle_connection(
        self: Arc<Self>,
        raw_stream: tokio::net::TcpStream,
        addr: std::net::SocketAddr,
    ) {
        info!("New WebSocket connection from: {}", addr);

        let ws_stream = match tokio_tungstenite::accept_async(raw_stream).await {
            Ok(ws) => ws,
            Err(e) => {
                error!("Error during WebSocket handshake: {}", e);
                return;
            }
        };

        let (ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        let connection_id = Uuid::new_v4();
        let router = self.router.clone();

        router.connections().register(connection_id, tx.clone()).await;

        // Greet before anything else so the client learns its connection id
        let hello = ServerFrame::Connected {
            connection_id,
            timestamp: now_millis(),
        };
        if tx.send(Message::Text(hello.to_text())).is_err() {
            router.disconnect(connection_id).await;
            return;
        }

        // Forward messages from rx to the websocket sink
        let send_task = tokio::spawn(async move {
            let mut ws_sink = ws_sink;
            let mut rx = rx;

            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_sink.send(message).await {
                    error!("Error sending WebSocket message: {}", e);
                    break;
                }
            }

            if let Err(e) = ws_sink.close().await {
                error!("Error closing WebSocket connection: {}", e);
            }
        });

        // Handle incoming frames until the peer goes away
        let receive_router = router.clone();
        let receive_task = tokio::spawn(async move {
            while let Some(message) = ws_stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        receive_router.handle_text(connection_id, &text).await;
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = tx.send(Message::Pong(data));
                    }
                    Ok(Message::Close(_)) => {
                        info!("Client initiated close for connection {}", connection_id);
                        break;
                    }
                    Ok(Message::Binary(_)) => {
                        warn!(
                            "Binary frame on connection {} ignored; protocol is JSON text",
                            connection_id
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Error receiving WebSocket message: {}", e);
                        break;
                    }
                }
            }
        });

        // Wait for either side to finish
        tokio::select! {
            _ = send_task => {
                info!("Send task completed for connection {}", connection_id);
            }
            _ = receive_task => {
                info!("Receive task completed for connection {}", connection_id);
            }
        }

        // Cleanup runs regardless of the close cause, so no room or user
        // bindings leak when a socket disappears abnormally
        router.disconnect(connection_id).await;
        info!("Connection {} closed", connection_id);
    }
}
