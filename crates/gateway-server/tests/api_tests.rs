//! Integration tests for the gateway server's HTTP routes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use gateway_core::config::{BackendConfig, BackendKind, Config};
use gateway_core::logging::NullLogSink;
use gateway_core::pipeline::Pipeline;
use gateway_core::rate_limiter::RateLimiter;
use gateway_core::registry::{BackendRegistry, HealthProbe, RoutingConfig};
use gateway_core::remote::openai_compat::OpenAiCompatBackend;
use gateway_core::remote::RemoteBackend;
use http_body_util::BodyExt;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gateway_server::state::AppState;

struct AlwaysUp;
#[async_trait::async_trait]
impl HealthProbe for AlwaysUp {
    async fn is_available(&self) -> bool {
        true
    }
}

fn api_backend_config(name: &str, base_url: String) -> BackendConfig {
    BackendConfig {
        name: name.to_string(),
        kind: BackendKind::Api,
        estimated_cost_per_request: 0.01,
        provider_family: "openai".to_string(),
        command: None,
        working_directory: None,
        claude_config_dir: None,
        max_concurrent: 2,
        max_queue: 10,
        timeout_ms: 30_000,
        queue_timeout_ms: 10_000,
        base_url: Some(base_url),
        api_key: Some("test-key".to_string()),
        model: Some("gpt-4o-mini".to_string()),
    }
}

async fn test_state(base_url: String, rate_limit_max: u32) -> Arc<AppState> {
    let backend = api_backend_config("test-api", base_url.clone());

    let mut probes: HashMap<String, Arc<dyn HealthProbe>> = HashMap::new();
    probes.insert("test-api".to_string(), Arc::new(AlwaysUp));

    let registry = Arc::new(
        BackendRegistry::new(vec![backend.clone()], probes, RoutingConfig::default()).expect("build registry"),
    );

    let mut remotes: HashMap<String, Arc<dyn RemoteBackend>> = HashMap::new();
    remotes.insert(
        "test-api".to_string(),
        Arc::new(OpenAiCompatBackend::new(
            base_url,
            "test-key".to_string(),
            "gpt-4o-mini".to_string(),
            "openai".to_string(),
        )),
    );

    let rate_limiter = Arc::new(RateLimiter::new(rate_limit_max, 60_000, true));
    let pools = HashMap::new();

    let pipeline = Pipeline::new(
        Arc::clone(&rate_limiter),
        Arc::clone(&registry),
        pools.clone(),
        remotes,
        Arc::new(NullLogSink),
    );

    Arc::new(AppState {
        config: Config::default(),
        rate_limiter,
        registry,
        pools,
        pipeline,
        log_sink: Arc::new(NullLogSink),
        started_at: Instant::now(),
    })
}

fn request_with_peer(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .expect("build request");
    req.extensions_mut()
        .insert(axum::extract::ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
    req
}

#[tokio::test]
async fn health_returns_ok() {
    let state = test_state("http://127.0.0.1:1".to_string(), 100).await;
    let router = gateway_server::build_router(state);

    let req = request_with_peer("GET", "/health", serde_json::json!({}));
    let response = router.oneshot(req).await.expect("send request");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn models_lists_configured_backend() {
    let state = test_state("http://127.0.0.1:1".to_string(), 100).await;
    let router = gateway_server::build_router(state);

    let req = request_with_peer("GET", "/v1/models", serde_json::json!({}));
    let response = router.oneshot(req).await.expect("send request");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"][0]["id"], "test-api");
}

#[tokio::test]
async fn chat_completions_happy_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "Hello there"}}],
            "model": "gpt-4o-mini",
            "usage": {"prompt_tokens": 5, "completion_tokens": 3}
        })))
        .mount(&server)
        .await;

    let state = test_state(server.uri(), 100).await;
    let router = gateway_server::build_router(state);

    let req = request_with_peer(
        "POST",
        "/v1/chat/completions",
        serde_json::json!({"messages": [{"role": "user", "content": "hi"}]}),
    );
    let response = router.oneshot(req).await.expect("send request");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "Hello there");
}

#[tokio::test]
async fn chat_completions_carries_rate_limit_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "ok"}}],
            "model": "gpt-4o-mini"
        })))
        .mount(&server)
        .await;

    let state = test_state(server.uri(), 50).await;
    let router = gateway_server::build_router(state);

    let req = request_with_peer(
        "POST",
        "/v1/chat/completions",
        serde_json::json!({"messages": [{"role": "user", "content": "hi"}]}),
    );
    let response = router.oneshot(req).await.expect("send request");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "50");
    assert!(response.headers().contains_key("x-ratelimit-remaining"));
    assert!(response.headers().contains_key("x-ratelimit-reset"));
}

#[tokio::test]
async fn chat_completions_for_backend_route_overrides_body_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "routed"}}],
            "model": "gpt-4o-mini"
        })))
        .mount(&server)
        .await;

    let state = test_state(server.uri(), 100).await;
    let router = gateway_server::build_router(state);

    let req = request_with_peer(
        "POST",
        "/v1/test-api/chat/completions",
        serde_json::json!({"messages": [{"role": "user", "content": "hi"}], "backend": "nonexistent"}),
    );
    let response = router.oneshot(req).await.expect("send request");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "routed");
}

#[tokio::test]
async fn chat_completions_prefers_body_session_id_over_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "ok"}}],
            "model": "gpt-4o-mini"
        })))
        .mount(&server)
        .await;

    let state = test_state(server.uri(), 100).await;
    let router = gateway_server::build_router(state);

    let body_session_id = "5e2f1a10-0000-4000-8000-000000000001";
    let mut req = request_with_peer(
        "POST",
        "/v1/chat/completions",
        serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}],
            "session_id": body_session_id,
        }),
    );
    req.headers_mut().insert(
        "x-session-id",
        "5e2f1a10-0000-4000-8000-000000000002".parse().unwrap(),
    );

    let response = router.oneshot(req).await.expect("send request");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["id"], body_session_id);
}

#[tokio::test]
async fn chat_completions_streaming_ends_with_done_sentinel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "a short reply"}}],
            "model": "gpt-4o-mini"
        })))
        .mount(&server)
        .await;

    let state = test_state(server.uri(), 100).await;
    let router = gateway_server::build_router(state);

    let req = request_with_peer(
        "POST",
        "/v1/chat/completions",
        serde_json::json!({"messages": [{"role": "user", "content": "hi"}], "stream": true}),
    );
    let response = router.oneshot(req).await.expect("send request");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.ends_with("data: [DONE]\n\n"));
    assert!(text.contains("data: {"));
}

#[tokio::test]
async fn chat_completions_rejects_oversized_body() {
    let state = test_state("http://127.0.0.1:1".to_string(), 100).await;
    let router = gateway_server::build_router(state);

    let mut req = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("content-length", "2000000")
        .body(Body::from(serde_json::to_vec(&serde_json::json!({})).unwrap()))
        .expect("build request");
    req.extensions_mut()
        .insert(axum::extract::ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

    let response = router.oneshot(req).await.expect("send request");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn chat_completions_rate_limited_after_cap() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "ok"}}],
            "model": "gpt-4o-mini"
        })))
        .mount(&server)
        .await;

    let state = test_state(server.uri(), 1).await;
    let router = gateway_server::build_router(state);

    let first = router.clone().oneshot(request_with_peer(
        "POST",
        "/v1/chat/completions",
        serde_json::json!({"messages": [{"role": "user", "content": "hi"}]}),
    )).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router.oneshot(request_with_peer(
        "POST",
        "/v1/chat/completions",
        serde_json::json!({"messages": [{"role": "user", "content": "hi"}]}),
    )).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn queue_status_returns_empty_map_with_no_cli_backends() {
    let state = test_state("http://127.0.0.1:1".to_string(), 100).await;
    let router = gateway_server::build_router(state);

    let req = request_with_peer("GET", "/v1/queue/status", serde_json::json!({}));
    let response = router.oneshot(req).await.expect("send request");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body.as_object().unwrap().is_empty());
}
