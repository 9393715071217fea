pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod stats;
pub mod websocket;

use std::sync::Arc;

use actix_web::{web, HttpResponse};

pub use config::Settings;
pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;

pub use auth::{JwtVerifier, TokenVerifier};
pub use client::{ClientConfig, ClientEvent, ConnectionState, RealtimeClient};
pub use websocket::{MessageRouter, WebSocketServer};

/// Health check endpoint handler
/// Returns server status, timestamp and the live relay snapshot
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let snapshot = state.server.router().snapshot().await;

    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "relay": snapshot,
    }))
}

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub server: Arc<WebSocketServer>,
}

impl AppState {
    pub fn new(config: Settings) -> Self {
        let verifier = Arc::new(JwtVerifier::new(
            config.auth.jwt_secret.clone(),
            config.auth.token_expiry_hours,
        ));

        Self {
            config: Arc::new(config),
            server: Arc::new(WebSocketServer::new(verifier)),
        }
    }
}
