//! Tandem relay server.
//!
//! Clients connect over WebSocket, create or join a session by id, and have
//! their playback control messages fanned out to the other members of that
//! session.

pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod relay;
pub mod session;
pub mod telemetry;
pub mod websocket;

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::info;

pub use config::{Cli, ServerConfig};
pub use error::RelayError;
pub use relay::{Outcome, Relay, RelayConfig};

pub struct AppState {
    pub relay: Relay,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(relay: Relay, metrics: Option<PrometheusHandle>) -> Arc<Self> {
        Arc::new(Self { relay, metrics })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(http::health_handler))
        .route("/debug/stats", get(http::stats_handler))
        .route("/metrics", get(http::metrics_handler))
        .route("/ws", get(websocket::websocket_handler))
        .route("/api", get(websocket::websocket_handler))
        .with_state(state)
}

/// Serve the relay on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server shutdown with error")
}

pub async fn run(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Result<()> {
    let relay = Relay::new(config.relay.clone());
    let state = AppState::new(relay, metrics);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("tandem relay listening on {}", config.listen_addr);

    serve(listener, state, shutdown_signal()).await?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
