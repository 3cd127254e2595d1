//! HTTP server fronting the multi-provider LLM gateway.
//!
//! Exposes an OpenAI-compatible `/v1/chat/completions` endpoint backed by
//! `gateway-core`'s rate limiter, router, process pools, and remote
//! backend adapters.

pub mod error;
pub mod logging;
pub mod probes;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use gateway_core::pipeline::MAX_BODY_BYTES;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the complete axum router with all API routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(routes::health::health))
        .route("/v1/models", get(routes::models::list_models))
        .route("/v1/queue/status", get(routes::queue::queue_status))
        .route("/v1/chat/completions", post(routes::chat::chat_completions))
        .route("/v1/{backend}/chat/completions", post(routes::chat::chat_completions_for_backend));

    let cors = if state.config.server.enable_cors {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    api.layer(DefaultBodyLimit::max(MAX_BODY_BYTES as usize))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
