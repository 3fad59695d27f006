//! HTTP surface for local signal adapters.
//!
//! This module provides an HTTP server that:
//! - Accepts signal events from local adapters via POST /ingest
//! - Exposes engine counters via GET /metrics for health dashboards
//! - Answers GET /health for liveness probes
//!
//! # Architecture
//!
//! ```text
//! OCR / audio / focus adapters ──▶ POST /ingest ──▶ pattern engine
//!                                                        │
//! dashboards ◀── GET /metrics ◀──────────────────────────┘
//! ```
//!
//! The server is a thin shim over [`SignalSender`]: detection itself never
//! runs on a request path.

use crate::clock::Clock;
use crate::coordinator::SignalSender;
use crate::metrics::{MetricsSnapshot, SharedMetrics};
use crate::signal::RawSignalEvent;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// Shared server state
pub struct ServerState {
    sender: SignalSender,
    metrics: SharedMetrics,
    clock: Arc<dyn Clock>,
}

impl ServerState {
    pub fn new(sender: SignalSender, metrics: SharedMetrics, clock: Arc<dyn Clock>) -> Self {
        Self {
            sender,
            metrics,
            clock,
        }
    }
}

/// Batch of signal events from an adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub events: Vec<RawSignalEvent>,
}

/// Response from the ingest endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub rejected: usize,
}

/// Response from the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn ingest_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<IngestRequest>,
) -> (StatusCode, Json<IngestResponse>) {
    let mut accepted = 0;
    let mut rejected = 0;
    for event in request.events {
        match state.sender.push(event) {
            Ok(()) => accepted += 1,
            Err(e) => {
                rejected += 1;
                tracing::debug!(error = %e, "ingest rejected event");
            }
        }
    }
    (StatusCode::OK, Json(IngestResponse { accepted, rejected }))
}

async fn metrics_handler(State(state): State<Arc<ServerState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot(state.clock.now()))
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// Build the router for the given state.
pub fn router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingest", post(ingest_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Run the server until Ctrl+C.
pub async fn run_server(config: ServerConfig, state: Arc<ServerState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;
    tracing::info!("Pattern engine server listening on http://{}", actual_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Server shutdown signal received");
        })
        .await?;

    Ok(())
}
