//! Per-backend process pool status, for operators watching back-pressure.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// `GET /v1/queue/status` — point-in-time counters for every CLI backend's
/// process pool.
pub async fn queue_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut backends = serde_json::Map::new();

    for (name, pool) in &state.pools {
        let counters = pool.counters();
        backends.insert(
            name.clone(),
            json!({
                "active": counters.active,
                "queued": counters.queued,
                "max_concurrent": counters.max_concurrent,
                "max_queue": counters.max_queue,
                "processed_total": counters.processed_total,
                "queued_total": counters.queued_total,
                "failed_total": counters.failed_total,
            }),
        );
    }

    Json(serde_json::Value::Object(backends))
}
