//! Operational endpoints: health, readiness and liveness probes.

use audience_segmentation::SegmentStore;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Shared state for the operational handlers.
#[derive(Clone)]
pub struct AppState {
    pub node_id: String,
    pub start_time: Instant,
    pub segments: Arc<dyn SegmentStore>,
}

/// GET /health: node identity and uptime.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready: Readiness probe for Kubernetes.
/// Returns 200 only when the segment store answers.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.segments.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "Readiness check failed: store unreachable");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// GET /live: Liveness probe for Kubernetes.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}
