//! Backend registry: holds the set of configured backends, classifies them,
//! and runs parallel health probes.

use crate::config::{is_denylisted, BackendConfig, BackendKind};
use crate::error::RouterError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A backend handle, mirroring the registry's data-model entry.
#[derive(Debug, Clone)]
pub struct Backend {
    /// Unique name within the registry.
    pub name: String,
    /// CLI or API.
    pub kind: BackendKind,
    /// Whether this backend honors tool-use request fields. Always true
    /// for `Cli` backends.
    pub supports_tools: bool,
    /// Relative cost estimate used by the router's tie-break ladder.
    pub estimated_cost_per_request: f64,
    /// Provider family label (e.g. `"anthropic"`, `"openai"`).
    pub provider_family: String,
    /// The configuration this handle was built from.
    pub config: BackendConfig,
}

impl From<BackendConfig> for Backend {
    fn from(config: BackendConfig) -> Self {
        Self {
            name: config.name.clone(),
            kind: config.kind,
            supports_tools: config.supports_tools(),
            estimated_cost_per_request: config.estimated_cost_per_request,
            provider_family: config.provider_family.clone(),
            config,
        }
    }
}

/// Probes whether a backend is currently able to accept work. Implemented
/// per backend kind (CLI: binary exists and is executable; API: reachable
/// and authorized).
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Returns true if the backend can currently accept work. Never
    /// returns an error to the caller; the registry coerces any internal
    /// failure to `false`.
    async fn is_available(&self) -> bool;
}

/// Routing-level defaults applied when a request does not pin a backend.
#[derive(Debug, Clone, Default)]
pub struct RoutingConfig {
    /// Backend name preferred when no explicit backend is requested.
    pub default: Option<String>,
    /// Whether the router should prefer the cheapest eligible backend.
    pub prefer_cheapest: bool,
    /// Ordered fallback chain of backend names.
    pub fallback_chain: Vec<String>,
}

/// Holds a name-to-backend map plus routing defaults.
pub struct BackendRegistry {
    backends: HashMap<String, Backend>,
    probes: HashMap<String, Arc<dyn HealthProbe>>,
    routing: RoutingConfig,
    /// Names in configuration order, since `HashMap` iteration order is
    /// not the order tool-capable backends should be tried in.
    order: Vec<String>,
}

impl BackendRegistry {
    /// Build a registry from backend configs and their health probes.
    ///
    /// Rejects any backend whose CLI working directory resolves under a
    /// system directory, and rejects an empty backend set outright.
    pub fn new(
        configs: Vec<BackendConfig>,
        probes: HashMap<String, Arc<dyn HealthProbe>>,
        routing: RoutingConfig,
    ) -> Result<Self, RouterError> {
        if configs.is_empty() {
            return Err(RouterError::NoBackendAvailable);
        }

        let mut backends = HashMap::new();
        let mut order = Vec::new();

        for config in configs {
            if let Some(dir) = &config.working_directory {
                if is_denylisted(dir) {
                    continue;
                }
            }
            order.push(config.name.clone());
            backends.insert(config.name.clone(), Backend::from(config));
        }

        if backends.is_empty() {
            return Err(RouterError::NoBackendAvailable);
        }

        Ok(Self {
            backends,
            probes,
            routing,
            order,
        })
    }

    /// Look up a backend by name.
    pub fn get(&self, name: &str) -> Option<&Backend> {
        self.backends.get(name)
    }

    /// All backends, in configuration order.
    pub fn list_all(&self) -> Vec<&Backend> {
        self.order.iter().filter_map(|name| self.backends.get(name)).collect()
    }

    /// Tool-capable backends, in configuration order.
    pub fn tool_capable(&self) -> Vec<&Backend> {
        self.list_all().into_iter().filter(|b| b.supports_tools).collect()
    }

    /// API-only backends, in configuration order.
    pub fn api_only(&self) -> Vec<&Backend> {
        self.list_all()
            .into_iter()
            .filter(|b| b.kind == BackendKind::Api)
            .collect()
    }

    /// The configured fallback chain.
    pub fn fallback_chain(&self) -> &[String] {
        &self.routing.fallback_chain
    }

    /// The configured default backend, if any.
    pub fn default_backend(&self) -> Option<&str> {
        self.routing.default.as_deref()
    }

    /// Whether the router should prefer the cheapest eligible backend.
    pub fn prefer_cheapest(&self) -> bool {
        self.routing.prefer_cheapest
    }

    /// Probe every registered backend's availability concurrently. A
    /// missing probe is treated as unavailable; a panicking probe would
    /// never be awaited directly by callers of this function since
    /// `is_available` never returns a `Result` — exceptions inside an
    /// implementation are the implementation's own responsibility to
    /// coerce to `false`.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let futures = self.order.iter().map(|name| {
            let name = name.clone();
            let probe = self.probes.get(&name).cloned();
            async move {
                let available = match probe {
                    Some(probe) => probe.is_available().await,
                    None => false,
                };
                (name, available)
            }
        });

        futures::future::join_all(futures).await.into_iter().collect()
    }

    /// Is a single named backend available? Used by the router's
    /// explicit-backend path.
    pub async fn is_available(&self, name: &str) -> bool {
        match self.probes.get(name) {
            Some(probe) => probe.is_available().await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    fn config(name: &str, kind: BackendKind) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            kind,
            estimated_cost_per_request: 0.01,
            provider_family: "anthropic".to_string(),
            command: Some("claude".to_string()),
            working_directory: None,
            claude_config_dir: None,
            max_concurrent: 2,
            max_queue: 10,
            timeout_ms: 120_000,
            queue_timeout_ms: 30_000,
            base_url: Some("https://example.invalid".to_string()),
            api_key: None,
            model: None,
        }
    }

    struct AlwaysUp;
    #[async_trait]
    impl HealthProbe for AlwaysUp {
        async fn is_available(&self) -> bool {
            true
        }
    }

    struct AlwaysDown;
    #[async_trait]
    impl HealthProbe for AlwaysDown {
        async fn is_available(&self) -> bool {
            false
        }
    }

    #[test]
    fn empty_config_rejected() {
        let result = BackendRegistry::new(vec![], HashMap::new(), RoutingConfig::default());
        assert!(matches!(result, Err(RouterError::NoBackendAvailable)));
    }

    #[test]
    fn denylisted_working_directory_dropped() {
        let mut cli = config("local", BackendKind::Cli);
        cli.working_directory = Some("/etc/secrets".to_string());
        let result = BackendRegistry::new(vec![cli], HashMap::new(), RoutingConfig::default());
        assert!(matches!(result, Err(RouterError::NoBackendAvailable)));
    }

    #[test]
    fn lookup_and_filters() {
        let cli = config("local-cli", BackendKind::Cli);
        let api = config("remote-api", BackendKind::Api);
        let registry = BackendRegistry::new(
            vec![cli, api],
            HashMap::new(),
            RoutingConfig::default(),
        )
        .unwrap();

        assert!(registry.get("local-cli").is_some());
        assert_eq!(registry.tool_capable().len(), 1);
        assert_eq!(registry.api_only().len(), 1);
        assert_eq!(registry.list_all().len(), 2);
    }

    #[tokio::test]
    async fn health_check_coerces_missing_probe_to_unavailable() {
        let cli = config("local-cli", BackendKind::Cli);
        let registry = BackendRegistry::new(
            vec![cli],
            HashMap::new(),
            RoutingConfig::default(),
        )
        .unwrap();
        let result = registry.health_check().await;
        assert_eq!(result.get("local-cli"), Some(&false));
    }

    #[tokio::test]
    async fn health_check_runs_all_probes_independently() {
        let mut probes: HashMap<String, Arc<dyn HealthProbe>> = HashMap::new();
        probes.insert("up".to_string(), Arc::new(AlwaysUp));
        probes.insert("down".to_string(), Arc::new(AlwaysDown));
        let registry = BackendRegistry::new(
            vec![config("up", BackendKind::Api), config("down", BackendKind::Api)],
            probes,
            RoutingConfig::default(),
        )
        .unwrap();
        let result = registry.health_check().await;
        assert_eq!(result.get("up"), Some(&true));
        assert_eq!(result.get("down"), Some(&false));
    }
}
