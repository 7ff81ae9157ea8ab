//! Health & Status API endpoints
//!
//! - GET /health   - Simple health check
//! - GET /healthz  - Liveness probe
//! - GET /metrics  - Prometheus metrics
//! - GET /status   - Envelope counts by state and uptime
//! - GET /attempts - Recent relay attempts, newest first (`?limit=N`)

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::Result;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::metrics;
use crate::orchestrator::AttemptLog;
use crate::store::EnvelopeStore;
use crate::types::{EnvelopeState, RelayAttempt};

const DEFAULT_ATTEMPTS_LIMIT: usize = 50;
const MAX_ATTEMPTS_LIMIT: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EnvelopeStore>,
    pub attempts: Arc<AttemptLog>,
    pub started: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn EnvelopeStore>, attempts: Arc<AttemptLog>) -> Self {
        Self {
            store,
            attempts,
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub envelopes: BTreeMap<EnvelopeState, u64>,
    pub recent_attempts: usize,
}

#[derive(Debug, Deserialize)]
pub struct AttemptsQuery {
    pub limit: Option<usize>,
}

async fn health() -> &'static str {
    "OK"
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

async fn status(State(state): State<AppState>) -> Response {
    let counts = match state.store.count_by_state().await {
        Ok(counts) => counts,
        Err(e) => {
            error!(error = %e, "Failed to count envelopes for status");
            metrics::record_error("api");
            return (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable").into_response();
        }
    };

    // Every state is listed, zero or not
    let mut envelopes: BTreeMap<EnvelopeState, u64> =
        EnvelopeState::ALL.iter().map(|state| (*state, 0)).collect();
    envelopes.extend(counts);

    Json(StatusResponse {
        status: "ok".to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        envelopes,
        recent_attempts: state.attempts.len(),
    })
    .into_response()
}

async fn attempts(
    State(state): State<AppState>,
    Query(query): Query<AttemptsQuery>,
) -> Json<Vec<RelayAttempt>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ATTEMPTS_LIMIT)
        .min(MAX_ATTEMPTS_LIMIT);
    Json(state.attempts.recent(limit))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(liveness))
        .route("/metrics", get(prometheus_metrics))
        .route("/status", get(status))
        .route("/attempts", get(attempts))
        .with_state(state)
}

/// Start the API server
pub async fn start_server(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server started");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
