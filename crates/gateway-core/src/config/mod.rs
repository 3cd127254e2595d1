//! Configuration management for the gateway.
//!
//! Supports three-layer configuration loading:
//! 1. Built-in defaults
//! 2. TOML config file (path argument, or `GATEWAY_CONFIG` env var)
//! 3. Environment variable overrides (`GATEWAY_` prefix)
//!
//! Backend definitions are loaded separately from a JSON file named by the
//! `BACKENDS_CONFIG` environment variable, since they are operational data
//! (credentials, local binary paths) rather than gateway behavior.

mod defaults;
mod env_overrides;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Sliding-window rate limiter settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Default system prompt and directory-context settings.
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Logging and request-log-sink settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Backend definitions, normally loaded from `BACKENDS_CONFIG`.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "defaults::default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "defaults::default_port")]
    pub port: u16,
    /// Whether to attach permissive CORS headers.
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enforced at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum requests per client within `window_ms`.
    #[serde(default = "defaults::default_rate_limit_max")]
    pub max_requests: u32,
    /// Sliding window length, in milliseconds.
    #[serde(default = "defaults::default_window_ms")]
    pub window_ms: u64,
    /// LRU cap on the number of tracked client entries.
    #[serde(default = "defaults::default_max_entries")]
    pub max_entries: usize,
    /// Interval between background cleanup sweeps, in milliseconds.
    #[serde(default = "defaults::default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

/// Prompt and directory-context settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    /// System prompt used when a request does not supply its own.
    #[serde(default)]
    pub default_system_prompt: Option<String>,
    /// Filename consulted by the directory-context reader for ambient
    /// project instructions (an external collaborator; this only names
    /// the file it looks for).
    #[serde(default = "defaults::default_context_filename")]
    pub context_filename: String,
}

/// Logging and persistent request-log-sink settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `debug`, `info`, `warn`, `error`.
    #[serde(default = "defaults::default_log_level")]
    pub level: String,
    /// Whether to persist request log records to SQLite in addition to
    /// emitting them as structured `tracing` events.
    #[serde(default)]
    pub enable_sqlite_logging: bool,
    /// Path to the SQLite database file when sqlite logging is enabled.
    #[serde(default = "defaults::default_database_path")]
    pub database_path: String,
}

/// Which side of the Backend contract a backend implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// A locally spawned, tool-capable subprocess, dispatched through a pool.
    Cli,
    /// A remote HTTP API, called directly.
    Api,
}

/// One backend's configuration, as loaded from the `BACKENDS_CONFIG` file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique name within the registry.
    pub name: String,
    /// CLI or API.
    pub kind: BackendKind,
    /// Relative cost estimate used by the router's tie-break ladder.
    #[serde(default)]
    pub estimated_cost_per_request: f64,
    /// Provider family label (e.g. `"anthropic"`, `"openai"`), used for
    /// dispatching to the matching remote adapter.
    pub provider_family: String,

    /// CLI backends: the binary to invoke.
    #[serde(default)]
    pub command: Option<String>,
    /// CLI backends: working directory the subprocess is spawned with.
    #[serde(default)]
    pub working_directory: Option<String>,
    /// CLI backends: value passed through as `CLAUDE_CONFIG_DIR`.
    #[serde(default)]
    pub claude_config_dir: Option<String>,
    /// CLI backends: max concurrently running subprocesses.
    #[serde(default = "defaults::default_max_concurrent")]
    pub max_concurrent: usize,
    /// CLI backends: max items waiting in the FIFO queue.
    #[serde(default = "defaults::default_max_queue")]
    pub max_queue: usize,
    /// CLI backends: subprocess wall-clock timeout, in milliseconds.
    #[serde(default = "defaults::default_executor_timeout_ms")]
    pub timeout_ms: u64,
    /// CLI backends: max time an item may wait in queue before rejection.
    #[serde(default = "defaults::default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,

    /// API backends: base URL of the remote endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// API backends: bearer credential. Resolved from environment at
    /// startup, never written back out in logs or error messages.
    #[serde(default)]
    pub api_key: Option<String>,
    /// API backends: model identifier to send upstream.
    #[serde(default)]
    pub model: Option<String>,
}

impl BackendConfig {
    /// True for `kind=Cli`, which implies `supports_tools=true` per the
    /// registry's data model.
    pub fn supports_tools(&self) -> bool {
        self.kind == BackendKind::Cli
    }
}

fn default_true() -> bool {
    true
}

/// System directories a backend's working directory must never resolve
/// under (checked at registry construction time).
pub const DENYLISTED_DIRS: &[&str] = &["/etc", "/var", "/usr", "/bin", "/sbin", "/root", "/proc", "/sys"];

impl Config {
    /// Load configuration from a TOML file with environment overrides, then
    /// load backend definitions from `BACKENDS_CONFIG` if set.
    ///
    /// Loading sequence:
    /// 1. Determine config file path (argument > `GATEWAY_CONFIG` env var > none)
    /// 2. Parse TOML file if present, else start from defaults
    /// 3. Apply environment variable overrides
    /// 4. Load backend definitions from `BACKENDS_CONFIG`, if set
    pub fn load(config_path: Option<&str>) -> Result<Config, ConfigError> {
        let path = Self::resolve_config_path(config_path);

        let mut config = match path {
            Some(path) => match std::fs::read_to_string(&path) {
                Ok(contents) => {
                    toml::from_str::<Config>(&contents).map_err(|e| ConfigError::ParseError { source: e })?
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ConfigError::FileNotFound {
                        path: path.display().to_string(),
                    });
                }
                Err(_) => {
                    return Err(ConfigError::FileNotFound {
                        path: path.display().to_string(),
                    });
                }
            },
            None => Config::default(),
        };

        config.apply_env_overrides()?;

        if let Ok(backends_path) = env::var("BACKENDS_CONFIG") {
            config.backends = load_backends_file(&backends_path)?;
        }

        Ok(config)
    }

    /// Validate the configuration, returning every error found rather than
    /// just the first.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if self.backends.is_empty() {
            errors.push(ConfigError::MissingField {
                field: "backends".to_string(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.name.clone()) {
                errors.push(ConfigError::InvalidValue {
                    field: "backends".to_string(),
                    message: format!("duplicate backend name '{}'", backend.name),
                });
            }

            match backend.kind {
                BackendKind::Cli => {
                    if backend.command.is_none() {
                        errors.push(ConfigError::MissingField {
                            field: format!("backends.{}.command", backend.name),
                        });
                    }
                    if let Some(dir) = &backend.working_directory {
                        if is_denylisted(dir) {
                            errors.push(ConfigError::InvalidValue {
                                field: format!("backends.{}.working_directory", backend.name),
                                message: format!("'{dir}' resolves under a denylisted system directory"),
                            });
                        }
                    }
                }
                BackendKind::Api => {
                    if backend.base_url.is_none() {
                        errors.push(ConfigError::MissingField {
                            field: format!("backends.{}.base_url", backend.name),
                        });
                    }
                }
            }
        }

        if self.rate_limit.max_requests == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "rate_limit.max_requests".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn resolve_config_path(config_path: Option<&str>) -> Option<PathBuf> {
        if let Some(path) = config_path {
            return Some(expand_tilde(path));
        }
        env::var("GATEWAY_CONFIG").ok().map(|p| expand_tilde(&p))
    }
}

/// True if `path` resolves under one of [`DENYLISTED_DIRS`].
pub fn is_denylisted(path: &str) -> bool {
    let expanded = expand_tilde(path);
    DENYLISTED_DIRS
        .iter()
        .any(|denied| expanded.starts_with(denied))
}

fn load_backends_file(path: &str) -> Result<Vec<BackendConfig>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_string(),
    })?;
    serde_json::from_str(&contents).map_err(|e| ConfigError::BackendsParseError {
        path: path.to_string(),
        source: e,
    })
}

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_backend(name: &str) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            kind: BackendKind::Api,
            estimated_cost_per_request: 0.01,
            provider_family: "anthropic".to_string(),
            command: None,
            working_directory: None,
            claude_config_dir: None,
            max_concurrent: 2,
            max_queue: 10,
            timeout_ms: 120_000,
            queue_timeout_ms: 30_000,
            base_url: Some("https://api.anthropic.com".to_string()),
            api_key: Some("test-key".to_string()),
            model: Some("claude-sonnet".to_string()),
        }
    }

    #[test]
    fn default_config_fails_validation_with_no_backends() {
        let config = Config::default();
        let errors = config.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::MissingField { field } if field == "backends")));
    }

    #[test]
    fn valid_config_passes() {
        let mut config = Config::default();
        config.backends.push(api_backend("claude-api"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn duplicate_backend_names_rejected() {
        let mut config = Config::default();
        config.backends.push(api_backend("dup"));
        config.backends.push(api_backend("dup"));
        let errors = config.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidValue { message, .. } if message.contains("duplicate"))));
    }

    #[test]
    fn cli_backend_without_command_rejected() {
        let mut config = Config::default();
        let mut backend = api_backend("cli-one");
        backend.kind = BackendKind::Cli;
        backend.command = None;
        config.backends.push(backend);
        let errors = config.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::MissingField { field } if field.ends_with("command"))));
    }

    #[test]
    fn denylisted_working_directory_rejected() {
        let mut config = Config::default();
        let mut backend = api_backend("cli-two");
        backend.kind = BackendKind::Cli;
        backend.command = Some("claude".to_string());
        backend.working_directory = Some("/etc/secrets".to_string());
        config.backends.push(backend);
        let errors = config.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidValue { field, .. } if field.contains("working_directory"))));
    }

    #[test]
    fn zero_rate_limit_rejected() {
        let mut config = Config::default();
        config.backends.push(api_backend("ok"));
        config.rate_limit.max_requests = 0;
        let errors = config.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidValue { field, .. } if field == "rate_limit.max_requests")));
    }

    #[test]
    fn backend_supports_tools_reflects_kind() {
        let mut backend = api_backend("probe");
        assert!(!backend.supports_tools());
        backend.kind = BackendKind::Cli;
        assert!(backend.supports_tools());
    }

    #[test]
    fn expand_tilde_works() {
        let expanded = expand_tilde("~/.config/gateway/config.toml");
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn expand_tilde_no_tilde() {
        let expanded = expand_tilde("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn is_denylisted_matches_system_dirs() {
        assert!(is_denylisted("/etc/passwd"));
        assert!(is_denylisted("/root/.ssh"));
        assert!(!is_denylisted("/home/user/project"));
    }
}
