//! The request pipeline: composes the rate limiter, router, process pool,
//! and executor/remote backends into one call per incoming request, and
//! emits exactly one log record per request.

use crate::error::GatewayError;
use crate::executor::{ExecutionRequest, Message, SessionControl};
use crate::logging::{RequestLogRecord, RequestLogSink};
use crate::pool::ProcessPool;
use crate::rate_limiter::{CheckResult, RateLimiter};
use crate::registry::BackendRegistry;
use crate::remote::{RemoteBackend, RemoteParams};
use crate::router::{RouteOptions, RouteRequest, Router};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Maximum accepted request body size, per the resource cap.
pub const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// Maximum accepted JSON-parameter size, per the resource cap (kept in
/// sync with [`crate::executor::sanitize`]'s own constant for the same
/// bound, since that module already enforces it independently — this one
/// documents the cap for callers inspecting `Content-Length` alone).
pub const MAX_JSON_PARAM_BYTES: usize = 10 * 1024;

/// A fully parsed chat-completion request, extended with the gateway's
/// own fields. Schema validation against the OpenAI-compatible shape is
/// an external collaborator; by the time this reaches the pipeline it is
/// assumed structurally valid.
#[derive(Debug, Clone, Default)]
pub struct ChatCompletionRequest {
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub stream: bool,
    pub session_id: Option<String>,
    pub backend: Option<String>,
    pub working_directory: Option<String>,
    pub context_files: Vec<String>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub max_budget_usd: Option<f64>,
    pub permission_mode: Option<String>,
    pub append_system_prompt: Option<String>,
    pub json_schema: Option<serde_json::Value>,
    pub agent: Option<String>,
    pub agents: Option<serde_json::Value>,
    pub continue_conversation: bool,
    pub fork_session: bool,
    pub ephemeral: bool,
    pub add_dirs: Vec<String>,
    pub fallback_model: Option<String>,
    pub mcp_config: Vec<String>,
    pub strict_mcp_config: bool,
    pub verbose: bool,
    pub betas: Vec<String>,
}

/// Result of running one request through the pipeline, independent of any
/// HTTP framing.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub ok: bool,
    pub output_text: String,
    pub session_id: Option<String>,
    pub backend: String,
    pub decision_reason: String,
    pub is_fallback: bool,
    pub error: Option<GatewayError>,
}

/// One backend's resources, as wired up at startup.
pub enum BackendResources {
    Cli { pool: Arc<ProcessPool> },
    Api { remote: Arc<dyn RemoteBackend> },
}

/// Composition root: owns the shared state the pipeline touches and wires
/// components A through D together for each request.
pub struct Pipeline {
    pub rate_limiter: Arc<RateLimiter>,
    registry: Arc<BackendRegistry>,
    router: Router,
    resources: HashMap<String, BackendResources>,
    log_sink: Arc<dyn RequestLogSink>,
}

impl Pipeline {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        registry: Arc<BackendRegistry>,
        pools: HashMap<String, Arc<ProcessPool>>,
        remotes: HashMap<String, Arc<dyn RemoteBackend>>,
        log_sink: Arc<dyn RequestLogSink>,
    ) -> Self {
        let router = Router::new(Arc::clone(&registry), pools.clone());

        let mut resources = HashMap::new();
        for (name, pool) in pools {
            resources.insert(name, BackendResources::Cli { pool });
        }
        for (name, remote) in remotes {
            resources.insert(name, BackendResources::Api { remote });
        }

        Self {
            rate_limiter,
            registry,
            router,
            resources,
            log_sink,
        }
    }

    /// Step 3 of the pipeline: check the rate limit for `key`.
    pub fn check_rate_limit(&self, key: &str) -> CheckResult {
        self.rate_limiter.check(key)
    }

    /// Step 4: enforce the request body size cap.
    pub fn check_body_size(content_length: Option<i64>) -> Result<(), GatewayError> {
        match content_length {
            Some(len) if len < 0 => Err(GatewayError::InvalidArgument(
                "Content-Length must not be negative".to_string(),
            )),
            Some(len) if len as u64 > MAX_BODY_BYTES => Err(GatewayError::PayloadTooLarge),
            _ => Ok(()),
        }
    }

    /// Step 5: validate and normalize an optional `X-Session-Id` header.
    /// Requires UUID v1-v5 syntax; lowercases the result.
    pub fn validate_session_id(raw: &str) -> Result<String, GatewayError> {
        let parsed = uuid::Uuid::parse_str(raw)
            .map_err(|_| GatewayError::InvalidArgument("X-Session-Id must be a valid UUID".to_string()))?;
        let version = parsed.get_version_num();
        if !(1..=5).contains(&version) {
            return Err(GatewayError::InvalidArgument(
                "X-Session-Id must be UUID version 1-5".to_string(),
            ));
        }
        Ok(parsed.to_string().to_lowercase())
    }

    /// Steps 7-9: resolve the backend, execute the request, and emit the
    /// log record. Streaming is the caller's responsibility: this always
    /// returns the completed result, which the caller may then pass to
    /// [`crate::streaming::chunk_completion`].
    pub async fn handle(&self, req: ChatCompletionRequest) -> PipelineResult {
        let started = Instant::now();
        let route_req = to_route_request(&req);
        let opts = RouteOptions {
            explicit_backend: req.backend.clone(),
            allow_fallback: true,
        };

        let decision = match self.router.route(&route_req, &opts).await {
            Ok(decision) => decision,
            Err(err) => {
                let gateway_err = GatewayError::from(err);
                self.emit_log(
                    "unknown",
                    "no backend available",
                    started,
                    0,
                    0,
                    0.0,
                    false,
                    Some(gateway_err.to_string()),
                )
                .await;
                return PipelineResult {
                    ok: false,
                    output_text: String::new(),
                    session_id: req.session_id.clone(),
                    backend: "unknown".to_string(),
                    decision_reason: "no backend available".to_string(),
                    is_fallback: false,
                    error: Some(gateway_err),
                };
            }
        };

        let backend_name = decision.backend.clone();
        let result = self.dispatch(&backend_name, &req).await;

        let (output_text, session_id, input_tokens, output_tokens, cost_usd, error) = match &result {
            Ok((text, session, usage, cost)) => (text.clone(), session.clone(), usage.0, usage.1, *cost, None),
            Err(err) => (String::new(), req.session_id.clone(), 0, 0, 0.0, Some(err.to_string())),
        };

        self.emit_log(
            &backend_name,
            &decision.reason,
            started,
            input_tokens,
            output_tokens,
            cost_usd,
            decision.is_fallback,
            error.clone(),
        )
        .await;

        PipelineResult {
            ok: result.is_ok(),
            output_text,
            session_id,
            backend: backend_name,
            decision_reason: decision.reason,
            is_fallback: decision.is_fallback,
            error: result.err(),
        }
    }

    #[allow(clippy::type_complexity)]
    async fn dispatch(
        &self,
        backend_name: &str,
        req: &ChatCompletionRequest,
    ) -> Result<(String, Option<String>, (u64, u64), f64), GatewayError> {
        match self.resources.get(backend_name) {
            Some(BackendResources::Cli { pool }) => {
                let exec_req = to_execution_request(req)?;
                let result = pool.execute(exec_req).await?;
                if !result.ok {
                    return Err(GatewayError::UpstreamError(
                        result.error.unwrap_or_else(|| "execution failed".to_string()),
                    ));
                }
                let usage = result
                    .metadata
                    .as_ref()
                    .map(|m| (m.usage.input, m.usage.output))
                    .unwrap_or((0, 0));
                let cost = result.metadata.as_ref().map(|m| m.cost_usd).unwrap_or(0.0);
                Ok((result.output_text, result.session_id, usage, cost))
            }
            Some(BackendResources::Api { remote }) => {
                let backend = self
                    .registry
                    .get(backend_name)
                    .ok_or_else(|| GatewayError::InvalidArgument(format!("unknown backend: {backend_name}")))?;
                let params = RemoteParams::default();
                let response = remote.complete(&req.messages, &params).await?;
                let cost = crate::remote::pricing::lookup(&backend.provider_family, &response.model)
                    .compute_cost(response.usage.input_tokens as u32, response.usage.output_tokens as u32);
                Ok((
                    response.text,
                    req.session_id.clone(),
                    (response.usage.input_tokens, response.usage.output_tokens),
                    cost,
                ))
            }
            None => Err(GatewayError::Internal(format!("no resources wired for backend {backend_name}"))),
        }
    }

    async fn emit_log(
        &self,
        backend: &str,
        decision_reason: &str,
        started: Instant,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        is_fallback: bool,
        error: Option<String>,
    ) {
        self.log_sink
            .record(RequestLogRecord {
                backend: backend.to_string(),
                decision_reason: decision_reason.to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
                input_tokens,
                output_tokens,
                cost_usd,
                is_fallback,
                error,
            })
            .await;
    }
}

fn to_route_request(req: &ChatCompletionRequest) -> RouteRequest {
    let total_content_chars = req.messages.iter().map(|m| m.content.len() as u64).sum();
    RouteRequest {
        allowed_tools: req.allowed_tools.clone(),
        disallowed_tools: req.disallowed_tools.clone(),
        working_directory: req.working_directory.clone(),
        context_files: req.context_files.clone(),
        add_dirs: req.add_dirs.clone(),
        total_content_chars,
        model_hint: req.model.clone(),
    }
}

fn to_execution_request(req: &ChatCompletionRequest) -> Result<ExecutionRequest, GatewayError> {
    let resuming = req.session_id.is_some() && !req.continue_conversation;
    let query = crate::executor::build_prompt(&req.messages, resuming)?;

    let session_control = if req.session_id.is_some() {
        Some(SessionControl::Resume)
    } else if req.continue_conversation {
        Some(SessionControl::ContinueLatest)
    } else {
        Some(SessionControl::New)
    };

    Ok(ExecutionRequest {
        query,
        session_id: req.session_id.clone(),
        session_control,
        model: req.model.clone(),
        fallback_model: req.fallback_model.clone(),
        system_prompt: None,
        append_system_prompt: req.append_system_prompt.clone(),
        fork_session: req.fork_session,
        no_session_persistence: req.ephemeral,
        allowed_tools: req.allowed_tools.clone(),
        disallowed_tools: req.disallowed_tools.clone(),
        max_budget_usd: req.max_budget_usd,
        permission_mode: req.permission_mode.clone(),
        json_schema: req.json_schema.clone(),
        agent: req.agent.clone(),
        agents: req.agents.clone(),
        add_dirs: req.add_dirs.clone(),
        mcp_config: req.mcp_config.clone(),
        strict_mcp_config: req.strict_mcp_config,
        verbose: req.verbose,
        betas: req.betas.clone(),
        working_directory: req.working_directory.clone(),
        claude_config_dir: None,
    })
}
