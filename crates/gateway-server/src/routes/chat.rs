//! The OpenAI-compatible `/v1/chat/completions` endpoint: rate limiting,
//! body-size and session-id validation, routing, dispatch, and — for
//! streaming requests — simulated SSE chunking of the completed response.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::executor::Message;
use gateway_core::pipeline::{ChatCompletionRequest, Pipeline};
use gateway_core::rate_limiter::extract_key;
use gateway_core::streaming::{chunk_completion, chunk_error, StreamItem};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

/// The OpenAI-compatible request body, extended with the gateway's own
/// routing and execution fields.
#[derive(Debug, Deserialize, Default)]
pub struct ChatCompletionRequestBody {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub context_files: Vec<String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub disallowed_tools: Vec<String>,
    #[serde(default)]
    pub max_budget_usd: Option<f64>,
    #[serde(default)]
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub append_system_prompt: Option<String>,
    #[serde(default)]
    pub json_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub agents: Option<serde_json::Value>,
    #[serde(default)]
    pub continue_conversation: bool,
    #[serde(default)]
    pub fork_session: bool,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub add_dirs: Vec<String>,
    #[serde(default)]
    pub fallback_model: Option<String>,
    #[serde(default)]
    pub mcp_config: Vec<String>,
    #[serde(default)]
    pub strict_mcp_config: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub betas: Vec<String>,
}

/// `POST /v1/chat/completions`.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionRequestBody>,
) -> Response {
    handle(state, peer, headers, body, None).await
}

/// `POST /v1/{backend}/chat/completions`. The path segment overrides any
/// `backend` field present in the body.
pub async fn chat_completions_for_backend(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(backend): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionRequestBody>,
) -> Response {
    handle(state, peer, headers, body, Some(backend)).await
}

async fn handle(
    state: Arc<AppState>,
    peer: SocketAddr,
    headers: HeaderMap,
    body: ChatCompletionRequestBody,
    path_backend: Option<String>,
) -> Response {
    let content_length = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok());
    if let Err(err) = Pipeline::check_body_size(content_length) {
        return ApiError::from(err).into_response();
    }

    let limit = state.config.rate_limit.max_requests;
    let key = extract_key(&headers, Some(&peer.ip().to_string()));
    let check = state.pipeline.check_rate_limit(&key);
    if !check.allowed {
        let mut response = ApiError::from(gateway_core::GatewayError::RateLimited {
            retry_after_secs: check.retry_after.unwrap_or(1),
        })
        .into_response();
        apply_rate_limit_headers(response.headers_mut(), limit, 0, check.reset_at);
        return response;
    }

    // The header is merged into the body only when the body does not
    // already carry `session_id` — an explicit body field wins.
    let session_id = if body.session_id.is_some() {
        body.session_id.clone()
    } else {
        match headers.get("x-session-id").and_then(|v| v.to_str().ok()) {
            Some(raw) => match Pipeline::validate_session_id(raw) {
                Ok(id) => Some(id),
                Err(err) => return ApiError::from(err).into_response(),
            },
            None => None,
        }
    };

    let req = ChatCompletionRequest {
        messages: body.messages,
        model: body.model,
        stream: body.stream,
        session_id,
        backend: path_backend.or(body.backend),
        working_directory: body.working_directory,
        context_files: body.context_files,
        allowed_tools: body.allowed_tools,
        disallowed_tools: body.disallowed_tools,
        max_budget_usd: body.max_budget_usd,
        permission_mode: body.permission_mode,
        append_system_prompt: body.append_system_prompt,
        json_schema: body.json_schema,
        agent: body.agent,
        agents: body.agents,
        continue_conversation: body.continue_conversation,
        fork_session: body.fork_session,
        ephemeral: body.ephemeral,
        add_dirs: body.add_dirs,
        fallback_model: body.fallback_model,
        mcp_config: body.mcp_config,
        strict_mcp_config: body.strict_mcp_config,
        verbose: body.verbose,
        betas: body.betas,
    };

    let stream = req.stream;
    let result = state.pipeline.handle(req).await;

    if stream {
        let items = if result.ok {
            chunk_completion(&result.output_text, result.session_id.clone())
        } else {
            chunk_error(result.error.as_ref().map(|e| e.to_string()).unwrap_or_default())
        };
        return sse_response(items, limit, check.remaining, check.reset_at);
    }

    if !result.ok {
        let err = result.error.unwrap_or(gateway_core::GatewayError::Internal("unknown failure".to_string()));
        let mut response = ApiError::from(err).into_response();
        apply_rate_limit_headers(response.headers_mut(), limit, check.remaining, check.reset_at);
        return response;
    }

    let body = json!({
        "id": result.session_id.clone().unwrap_or_else(|| "gateway-completion".to_string()),
        "object": "chat.completion",
        "model": result.backend,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": result.output_text },
            "finish_reason": "stop",
        }],
    });

    let mut response = (StatusCode::OK, Json(body)).into_response();
    apply_rate_limit_headers(response.headers_mut(), limit, check.remaining, check.reset_at);
    response
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset_at: u64) {
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&reset_at.to_string()) {
        headers.insert("x-ratelimit-reset", value);
    }
}

/// Render the already-computed chunk sequence as an SSE body: one
/// `data: <json>\n\n` line per chunk, a final `data: [DONE]\n\n` sentinel.
fn sse_response(items: Vec<StreamItem>, limit: u32, remaining: u32, reset_at: u64) -> Response {
    let mut body = String::new();
    for item in items {
        let payload = match item {
            StreamItem::Chunk(chunk) => json!({
                "object": "chat.completion.chunk",
                "choices": [{
                    "index": 0,
                    "delta": { "content": chunk.delta_content },
                    "finish_reason": chunk.finish_reason,
                }],
            }),
            StreamItem::Error(message) => json!({ "error": { "message": message, "type": "server_error" } }),
        };
        body.push_str("data: ");
        body.push_str(&payload.to_string());
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    apply_rate_limit_headers(response.headers_mut(), limit, remaining, reset_at);
    response
}
