//! OpenAI-compatible model listing.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// `GET /v1/models` — lists the configured backends as OpenAI-style model
/// objects, `id` set to the backend name.
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let data: Vec<serde_json::Value> = state
        .registry
        .list_all()
        .into_iter()
        .map(|backend| {
            json!({
                "id": backend.name,
                "object": "model",
                "owned_by": backend.provider_family,
            })
        })
        .collect();

    Json(json!({
        "object": "list",
        "data": data,
    }))
}
