//! Shared application state for the gateway server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use gateway_core::config::Config;
use gateway_core::logging::RequestLogSink;
use gateway_core::pipeline::Pipeline;
use gateway_core::pool::ProcessPool;
use gateway_core::rate_limiter::RateLimiter;
use gateway_core::registry::BackendRegistry;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    /// The configuration the server was started with.
    pub config: Config,
    /// The shared rate limiter, also reachable through `pipeline`.
    pub rate_limiter: Arc<RateLimiter>,
    /// The backend registry, for the `/v1/models` route and health checks.
    pub registry: Arc<BackendRegistry>,
    /// Per-backend process pools, kept here in addition to the pipeline's
    /// own copy so the `/v1/queue/status` route can read their counters
    /// without the pipeline needing to expose its internal resource map.
    pub pools: HashMap<String, Arc<ProcessPool>>,
    /// The composed request pipeline.
    pub pipeline: Pipeline,
    /// The request-log sink, wired separately from the pipeline's own copy
    /// only so routes that want to inspect sink health can reach it too.
    pub log_sink: Arc<dyn RequestLogSink>,
    /// When this process started, for the health route's uptime field.
    pub started_at: Instant,
}
