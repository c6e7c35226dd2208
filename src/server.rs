use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::config::RelayConfig;
use crate::relay::Relay;
use crate::ws;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub relay: Relay,
    ports: AtomicUsize,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(relay: Relay) -> Self {
        Self {
            relay,
            ports: AtomicUsize::new(0),
        }
    }

    pub fn port_count(&self) -> usize {
        self.ports.load(Ordering::SeqCst)
    }

    /// Returns the number of open ports including this one.
    pub(crate) fn port_opened(&self) -> usize {
        self.ports.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn port_closed(&self) -> usize {
        self.ports.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }
}

/// Build the router: `/port` for tabs, `/health` for probes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/port", get(ws::port_handler))
        .with_state(state)
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "ports": state.port_count(),
        "topics": state.relay.topic_counts(),
    }))
}

/// Start the relay server and run until Ctrl+C.
pub async fn start_server(config: RelayConfig, dev_mode: bool) -> Result<()> {
    let relay = Relay::from_config(&config).context("Failed to initialize relay")?;
    let state = Arc::new(AppState::new(relay));

    let mut app = build_router(state);

    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if dev_mode { "0.0.0.0" } else { config.server.host.as_str() };
    let addr = format!("{}:{}", host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(
        %local_addr,
        metrics_url = %config.metrics_url(),
        ws_url = %config.upstream.ws_url,
        "portrelay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
