//! Picks a backend from request features, enforces capacity, and performs
//! degraded fallback from tool-capable backends to plain API backends.

use crate::error::RouterError;
use crate::pool::ProcessPool;
use crate::registry::{Backend, BackendRegistry};
use std::collections::HashMap;
use std::sync::Arc;

/// The subset of a chat-completion request the router needs to decide.
#[derive(Debug, Clone, Default)]
pub struct RouteRequest {
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub working_directory: Option<String>,
    pub context_files: Vec<String>,
    pub add_dirs: Vec<String>,
    /// Total character count across the request's message content, used
    /// for the token estimate.
    pub total_content_chars: u64,
    /// The request's model hint, if any (e.g. `"claude-sonnet-4"`).
    pub model_hint: Option<String>,
}

/// Caller-supplied routing options.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// An explicit backend name, from the URL path or body field.
    pub explicit_backend: Option<String>,
    /// Whether degrading from a tool-capable backend to a plain API
    /// backend is permitted when no tool-capable backend has capacity.
    pub allow_fallback: bool,
}

/// The router's decision for one request.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub backend: String,
    pub reason: String,
    pub is_fallback: bool,
    pub estimated_cost: f64,
}

/// True iff the request requires a tool-capable backend, per the fixed,
/// contract-level predicate.
pub fn requires_tools(req: &RouteRequest) -> bool {
    !req.allowed_tools.is_empty()
        || !req.disallowed_tools.is_empty()
        || req.working_directory.is_some()
        || !req.context_files.is_empty()
        || !req.add_dirs.is_empty()
}

/// Estimated prompt tokens: `ceil(total_content_chars / 4)`.
pub fn estimate_tokens(req: &RouteRequest) -> u64 {
    req.total_content_chars.div_ceil(4)
}

/// Estimate the cost of running `req` on `backend`. The router's data model
/// only tracks a flat per-request estimate; routing decisions and pool
/// stats are the only other inputs to the tie-break ladder.
pub fn estimate_cost(backend: &Backend, _req: &RouteRequest) -> f64 {
    backend.estimated_cost_per_request
}

/// Routes a request to a backend given the registry and live pool state.
pub struct Router {
    registry: Arc<BackendRegistry>,
    pools: HashMap<String, Arc<ProcessPool>>,
}

impl Router {
    pub fn new(registry: Arc<BackendRegistry>, pools: HashMap<String, Arc<ProcessPool>>) -> Self {
        Self { registry, pools }
    }

    /// Decide which backend should serve `req`.
    pub async fn route(&self, req: &RouteRequest, opts: &RouteOptions) -> Result<RoutingDecision, RouterError> {
        if let Some(name) = &opts.explicit_backend {
            let backend = self
                .registry
                .get(name)
                .ok_or_else(|| RouterError::UnknownBackend(name.clone()))?;
            if self.registry.is_available(name).await {
                return Ok(RoutingDecision {
                    backend: backend.name.clone(),
                    reason: "explicit backend requested".to_string(),
                    is_fallback: false,
                    estimated_cost: estimate_cost(backend, req),
                });
            }
            // Fall through to normal selection if the explicitly named
            // backend is unavailable; the request's tool requirements
            // still gate the rest of the decision.
        }

        if requires_tools(req) {
            return self.route_tool_capable(req, opts).await;
        }

        self.route_api_only(req).await
    }

    async fn route_tool_capable(&self, req: &RouteRequest, opts: &RouteOptions) -> Result<RoutingDecision, RouterError> {
        for backend in self.registry.tool_capable() {
            if !self.registry.is_available(&backend.name).await {
                continue;
            }
            let has_capacity = self
                .pools
                .get(&backend.name)
                .map(|pool| pool.has_capacity())
                .unwrap_or(true);
            if has_capacity {
                return Ok(RoutingDecision {
                    backend: backend.name.clone(),
                    reason: "tool-capable backend with capacity".to_string(),
                    is_fallback: false,
                    estimated_cost: estimate_cost(backend, req),
                });
            }
        }

        if opts.allow_fallback {
            if let Some(decision) = self.route_api_only(req).await.ok() {
                return Ok(RoutingDecision {
                    is_fallback: true,
                    reason: "degraded — tools disabled".to_string(),
                    ..decision
                });
            }
        }

        // No capacity and fallback not permitted (or no API backend
        // exists either): return the first available tool-capable
        // backend anyway; the pool enforces back-pressure and may reject
        // with `QueueFull`.
        for backend in self.registry.tool_capable() {
            if self.registry.is_available(&backend.name).await {
                return Ok(RoutingDecision {
                    backend: backend.name.clone(),
                    reason: "tool-capable backend at capacity, no fallback permitted".to_string(),
                    is_fallback: false,
                    estimated_cost: estimate_cost(backend, req),
                });
            }
        }

        Err(RouterError::NoBackendAvailable)
    }

    async fn route_api_only(&self, req: &RouteRequest) -> Result<RoutingDecision, RouterError> {
        let candidates = self.registry.api_only();
        let mut available = Vec::new();
        for backend in candidates {
            if self.registry.is_available(&backend.name).await {
                available.push(backend);
            }
        }

        if available.is_empty() {
            return Err(RouterError::NoBackendAvailable);
        }

        let tokens = estimate_tokens(req);
        let model_hint = req.model_hint.as_deref().unwrap_or("").to_lowercase();

        let chosen = if tokens > 100_000 {
            available.iter().find(|b| b.name.to_lowercase().contains("gemini"))
        } else if model_hint.contains("sonnet") || model_hint.contains("thinking") {
            available.iter().find(|b| b.name.to_lowercase().contains("sonnet"))
        } else {
            None
        };

        let chosen = chosen.or_else(|| {
            available
                .iter()
                .min_by(|a, b| {
                    estimate_cost(a, req)
                        .partial_cmp(&estimate_cost(b, req))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        let backend = chosen.ok_or(RouterError::NoBackendAvailable)?;

        Ok(RoutingDecision {
            backend: backend.name.clone(),
            reason: "minimum estimated cost".to_string(),
            is_fallback: false,
            estimated_cost: estimate_cost(backend, req),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_tools_true_when_working_directory_set() {
        let req = RouteRequest {
            working_directory: Some("/tmp/project".to_string()),
            ..Default::default()
        };
        assert!(requires_tools(&req));
    }

    #[test]
    fn requires_tools_false_for_plain_chat() {
        let req = RouteRequest::default();
        assert!(!requires_tools(&req));
    }

    #[test]
    fn estimate_tokens_rounds_up() {
        let req = RouteRequest {
            total_content_chars: 401,
            ..Default::default()
        };
        assert_eq!(estimate_tokens(&req), 101);
    }

    #[test]
    fn estimate_tokens_zero_for_empty() {
        let req = RouteRequest::default();
        assert_eq!(estimate_tokens(&req), 0);
    }
}
