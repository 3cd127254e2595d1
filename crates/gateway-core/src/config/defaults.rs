//! Default values for all configuration sections.
//!
//! Every field has a built-in default so a gateway with no config file and
//! no environment overrides still starts, serving only the routes that do
//! not require a backend.

use super::{LoggingConfig, PromptConfig, RateLimitConfig, ServerConfig};

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: true,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: default_rate_limit_max(),
            window_ms: default_window_ms(),
            max_entries: default_max_entries(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            default_system_prompt: None,
            context_filename: default_context_filename(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            enable_sqlite_logging: false,
            database_path: default_database_path(),
        }
    }
}

pub(super) fn default_host() -> String {
    "127.0.0.1".to_string()
}

pub(super) fn default_port() -> u16 {
    3000
}

pub(super) fn default_rate_limit_max() -> u32 {
    100
}

pub(super) fn default_window_ms() -> u64 {
    60_000
}

pub(super) fn default_max_entries() -> usize {
    10_000
}

pub(super) fn default_cleanup_interval_ms() -> u64 {
    60_000
}

pub(super) fn default_context_filename() -> String {
    "CLAUDE.md".to_string()
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_database_path() -> String {
    "./gateway.db".to_string()
}

pub(super) fn default_max_concurrent() -> usize {
    2
}

pub(super) fn default_max_queue() -> usize {
    10
}

pub(super) fn default_executor_timeout_ms() -> u64 {
    120_000
}

pub(super) fn default_queue_timeout_ms() -> u64 {
    30_000
}
