//! Gateway API server binary.
//!
//! Loads configuration, wires the rate limiter, backend registry, process
//! pools, and remote backend adapters into a [`gateway_core::pipeline::Pipeline`],
//! and serves the OpenAI-compatible HTTP API.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use gateway_core::config::{BackendKind, Config};
use gateway_core::executor::CliExecutor;
use gateway_core::logging::{NullLogSink, RequestLogSink};
use gateway_core::pipeline::Pipeline;
use gateway_core::pool::ProcessPool;
use gateway_core::rate_limiter::RateLimiter;
use gateway_core::registry::{BackendRegistry, HealthProbe, RoutingConfig};
use gateway_core::remote::anthropic::AnthropicBackend;
use gateway_core::remote::openai_compat::OpenAiCompatBackend;
use gateway_core::remote::RemoteBackend;
use tracing_subscriber::EnvFilter;

use gateway_server::logging::SqliteLogSink;
use gateway_server::probes::{CliHealthProbe, RemoteHealthProbe};
use gateway_server::state::AppState;

/// The multi-provider LLM gateway — an OpenAI-compatible HTTP API in front
/// of local CLI tools and remote LLM APIs.
#[derive(Parser)]
#[command(name = "gateway-server", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Host address to bind to. Use 0.0.0.0 for LAN access.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Path to the gateway configuration file.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if cli.host != "127.0.0.1" {
        config.server.host = cli.host.clone();
    }
    if cli.port != 3000 {
        config.server.port = cli.port;
    }

    if let Err(errors) = config.validate() {
        for err in &errors {
            tracing::error!(error = %err, "invalid configuration");
        }
        anyhow::bail!("configuration failed validation with {} error(s)", errors.len());
    }

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        backends = config.backends.len(),
        "starting gateway server"
    );

    let mut probes: HashMap<String, Arc<dyn HealthProbe>> = HashMap::new();
    let mut pools: HashMap<String, Arc<ProcessPool>> = HashMap::new();
    let mut remotes: HashMap<String, Arc<dyn RemoteBackend>> = HashMap::new();

    for backend in &config.backends {
        match backend.kind {
            BackendKind::Cli => {
                let command = backend
                    .command
                    .clone()
                    .context(format!("backend '{}' is missing 'command'", backend.name))?;
                probes.insert(backend.name.clone(), Arc::new(CliHealthProbe::new(command.clone())));

                let executor = CliExecutor::new(command, backend.timeout_ms);
                let pool = ProcessPool::new(executor, backend.max_concurrent, backend.max_queue, backend.queue_timeout_ms);
                pools.insert(backend.name.clone(), pool);
            }
            BackendKind::Api => {
                let base_url = backend
                    .base_url
                    .clone()
                    .context(format!("backend '{}' is missing 'base_url'", backend.name))?;
                let api_key = backend.api_key.clone().unwrap_or_default();
                let model = backend.model.clone().unwrap_or_default();

                let remote: Arc<dyn RemoteBackend> = if backend.provider_family == "anthropic" {
                    Arc::new(AnthropicBackend::with_base_url(api_key, model, base_url))
                } else {
                    Arc::new(OpenAiCompatBackend::new(base_url, api_key, model, backend.provider_family.clone()))
                };

                probes.insert(backend.name.clone(), Arc::new(RemoteHealthProbe::new(Arc::clone(&remote))));
                remotes.insert(backend.name.clone(), remote);
            }
        }
    }

    let routing = RoutingConfig::default();
    let registry = Arc::new(
        BackendRegistry::new(config.backends.clone(), probes, routing).context("building backend registry")?,
    );

    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit.max_requests,
        config.rate_limit.window_ms,
        config.rate_limit.enabled,
    ));

    let log_sink: Arc<dyn RequestLogSink> = if config.logging.enable_sqlite_logging {
        Arc::new(
            SqliteLogSink::connect(&config.logging.database_path)
                .await
                .context("opening request log database")?,
        )
    } else {
        Arc::new(NullLogSink)
    };

    let pipeline = Pipeline::new(
        Arc::clone(&rate_limiter),
        Arc::clone(&registry),
        pools.clone(),
        remotes,
        Arc::clone(&log_sink),
    );

    spawn_background_sweeps(Arc::clone(&rate_limiter), pools.clone(), config.rate_limit.cleanup_interval_ms);

    let state = Arc::new(AppState {
        config: config.clone(),
        rate_limiter,
        registry,
        pools,
        pipeline,
        log_sink,
        started_at: Instant::now(),
    });

    let router = gateway_server::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{addr}");
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

/// Periodically sweep the rate limiter's stale entries and every pool's
/// aged queue items. Both run on the limiter's configured interval.
fn spawn_background_sweeps(
    rate_limiter: Arc<RateLimiter>,
    pools: HashMap<String, Arc<ProcessPool>>,
    cleanup_interval_ms: u64,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(cleanup_interval_ms.max(1_000)));
        loop {
            interval.tick().await;
            rate_limiter.cleanup();
            for pool in pools.values() {
                pool.sweep_aged_items().await;
            }
        }
    });
}
