use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use blackonn_realtime::stats::{LogSink, MetricsSink};
use blackonn_realtime::{health_check, AppState, Settings};
use dotenv::dotenv;
use std::net::TcpListener;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();

    // Load configuration
    let config = Settings::new().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    let state = AppState::new(config.clone());
    let state = web::Data::new(state);

    // Websocket listener on its own port, separate from the HTTP surface
    let ws_addr = format!("{}:{}", config.realtime.host, config.realtime.port);
    let ws_listener = tokio::net::TcpListener::bind(&ws_addr)
        .await
        .with_context(|| format!("Failed to bind websocket listener on {}", ws_addr))?;
    info!("Realtime relay accepting connections at ws://{}", ws_addr);

    let ws_server = state.server.clone();
    tokio::spawn(async move {
        while let Ok((stream, addr)) = ws_listener.accept().await {
            let server = ws_server.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, addr).await;
            });
        }
    });

    // Periodic stats snapshots for the metrics sink
    let snapshot_state = state.clone();
    let snapshot_interval = Duration::from_secs(config.realtime.snapshot_interval_secs);
    tokio::spawn(async move {
        let sink = LogSink;
        loop {
            tokio::time::sleep(snapshot_interval).await;
            let snapshot = snapshot_state.server.router().snapshot().await;
            sink.record(&snapshot);
        }
    });

    // Create and bind TCP listener for the HTTP surface
    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;
    info!(
        "HTTP surface at http://{}:{}/health",
        config.server.host, config.server.port
    );

    // Start HTTP server
    HttpServer::new(move || {
        let cors = if config.cors.enabled {
            let cors_config = Cors::default();

            let cors_config = if config.cors.allow_any_origin {
                cors_config
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
            } else {
                cors_config
                    .allowed_origin("https://blackonn.com")
                    .allowed_origin("http://localhost:8080")
                    .allowed_methods(vec!["GET"])
                    .allowed_headers(vec!["Authorization", "Content-Type"])
            };

            cors_config.max_age(config.cors.max_age as usize)
        } else {
            Cors::default()
        };

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .context("HTTP server failed")?;

    Ok(())
}
