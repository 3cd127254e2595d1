//! Liveness and backend-availability probe.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// `GET /health` — never rate limited, never behind auth; reports process
/// uptime and per-backend availability.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let backends = state.registry.health_check().await;

    Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "backends": backends,
    }))
}
