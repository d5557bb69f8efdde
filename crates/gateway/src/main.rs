//! Gateway service entry point.
//!
//! Realtime presence and notification delivery for marketplace clients.

use anyhow::Result;
use gateway::{
    create_router, AppState, DeliveryBroker, JwtVerifier, MemoryHistory, NotificationStore,
    PresenceRegistry,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting gateway service");

    // Read configuration from environment
    let http_port: u16 = env::var("HTTP_PORT")
        .unwrap_or_else(|_| "8082".to_string())
        .parse()
        .expect("HTTP_PORT must be a number");
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9093".to_string())
        .parse()
        .expect("METRICS_PORT must be a number");
    let feed_capacity: usize = env::var("FEED_CAPACITY")
        .unwrap_or_else(|_| gateway::FEED_CAPACITY.to_string())
        .parse()
        .expect("FEED_CAPACITY must be a number");
    let jwt_secret = match env::var("JWT_SECRET") {
        Ok(secret) => secret,
        Err(_) => {
            warn!("JWT_SECRET not set, using development secret");
            "dev-secret".to_string()
        }
    };

    info!("Configuration:");
    info!("  HTTP_PORT: {}", http_port);
    info!("  METRICS_PORT: {}", metrics_port);
    info!("  FEED_CAPACITY: {}", feed_capacity);

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");
    info!("Prometheus metrics server started on port {}", metrics_port);

    // In-process history; swap for a database-backed implementation behind
    // the same trait when running multi-node.
    let history = Arc::new(MemoryHistory::new());

    let state = Arc::new(AppState {
        presence: Arc::new(PresenceRegistry::new()),
        store: Arc::new(NotificationStore::with_capacity(history, feed_capacity)),
        broker: Arc::new(DeliveryBroker::new()),
        verifier: Arc::new(JwtVerifier::new(&jwt_secret)),
    });

    let app = create_router(state);

    // Start HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);
    info!("Available endpoints:");
    info!("  GET   /health        - Health check");
    info!("  GET   /stats         - Service statistics");
    info!("  GET   /presence      - Public online snapshot");
    info!("  GET   /notifications - Paged history (bearer auth)");
    info!("  PATCH /notifications - Mark read (bearer auth)");
    info!("  POST  /notifications - Internal ingest (admin auth)");
    info!("  GET   /ws            - WebSocket upgrade");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
