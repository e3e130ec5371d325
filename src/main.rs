use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnpike::config::{EnvSnapshot, LimiterConfig};
use turnpike::middleware::rate_limit;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Starting Turnpike demo server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve the limiter configuration from the environment
    let env = EnvSnapshot::from_process();
    let config = Arc::new(LimiterConfig::resolve(None, &env)?);
    info!(
        ip_max = config.ip.max_requests_per_second,
        token_max = config.token.max_requests_per_second,
        "Rate limiter configured"
    );

    let app = Router::new()
        .route("/", get(|| async { "OK" }))
        .layer(axum::middleware::from_fn_with_state(config, rate_limit));

    let addr: SocketAddr = "0.0.0.0:8080".parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Turnpike demo server stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
