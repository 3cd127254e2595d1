//! Error types for the gateway core library.
//!
//! Each component has its own error enum so call sites can match on the
//! specific failure mode; `GatewayError` is the single type that crosses
//! component boundaries and carries the taxonomy the HTTP layer maps to
//! status codes.

/// Errors from configuration loading, parsing, and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required configuration field is absent.
    #[error("missing required config field: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration field has an unacceptable value.
    #[error("invalid value for config field '{field}': {message}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// A description of why the value is invalid.
        message: String,
    },

    /// The configuration file does not exist at the specified path.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// The path that was searched.
        path: String,
    },

    /// TOML deserialization failed.
    #[error("failed to parse config file: {source}")]
    ParseError {
        /// The underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },

    /// The backend definitions file failed to parse as JSON.
    #[error("failed to parse backends config '{path}': {source}")]
    BackendsParseError {
        /// Path to the backends config file.
        path: String,
        /// The underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by the CLI subprocess executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// A JSON-valued flag failed sanitization.
    #[error("invalid argument '{param}': {reason}")]
    InvalidArgument {
        /// The name of the offending parameter.
        param: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The query string was empty or whitespace-only.
    #[error("query must not be empty")]
    EmptyQuery,

    /// Writing the query to the child's stdin failed.
    #[error("failed to write to subprocess stdin: {0}")]
    StdinWriteError(String),

    /// The subprocess did not exit within the configured wall-clock timeout.
    #[error("subprocess timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// The subprocess could not be spawned at all.
    #[error("failed to spawn subprocess: {0}")]
    SpawnFailed(String),

    /// The subprocess exited with a non-zero status.
    #[error("subprocess exited with status {code}: {message}")]
    NonZeroExit {
        /// The process exit code, if one was observed.
        code: i32,
        /// stderr contents, or a generic message when stderr was empty.
        message: String,
    },

    /// The session-resume prompt builder was asked to resume with no prior
    /// user message in the history.
    #[error("cannot resume session: no prior user message")]
    NoUserMessage,
}

/// Errors raised by the process pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool is at capacity and its queue is full.
    #[error("pool queue is full")]
    QueueFull,

    /// An item aged out of the queue before it could be dispatched.
    #[error("item timed out waiting in queue")]
    QueueTimeout,

    /// The pool is shutting down and rejects new work.
    #[error("pool is shutting down")]
    Shutdown,

    /// The backend invocation itself failed.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Errors from interacting with remote LLM provider backends.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// HTTP request to the remote endpoint failed outright.
    #[error("remote request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote API returned a non-2xx response.
    #[error("remote API error (status {status}): {message}")]
    Api {
        /// The HTTP status code returned by the remote.
        status: u16,
        /// Truncated error body from the remote.
        message: String,
    },

    /// The remote signaled rate limiting.
    #[error("remote rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds to wait before retrying, per the remote's own headers.
        retry_after_secs: u64,
    },

    /// The remote's response body could not be parsed.
    #[error("failed to parse remote response: {0}")]
    Parse(String),
}

/// Errors raised while routing a request to a backend.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// No backend is available to satisfy the request.
    #[error("no backend available for this request")]
    NoBackendAvailable,

    /// A backend was named explicitly but is not registered.
    #[error("unknown backend: {0}")]
    UnknownBackend(String),
}

/// The unified error taxonomy that crosses the pipeline boundary and maps
/// directly to an HTTP status code and error envelope (see the request
/// pipeline and the server's `error` module).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed or unsafe input: empty query, oversized/deep JSON
    /// parameter, malformed session id, schema validation failure, or a
    /// request body that is too large.
    #[error("{0}")]
    InvalidArgument(String),

    /// The request body exceeded the configured size cap.
    #[error("request body too large")]
    PayloadTooLarge,

    /// The caller exceeded their rate limit.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the client may retry.
        retry_after_secs: u64,
    },

    /// The destination pool's queue was full and no fallback was permitted.
    #[error("backend pool queue is full")]
    QueueFull,

    /// A queued item aged out before being dispatched.
    #[error("backend pool queue timeout")]
    QueueTimeout,

    /// The CLI subprocess exceeded its wall-clock timeout.
    #[error("execution timed out")]
    ExecutionTimeout,

    /// A remote backend returned a non-2xx response.
    #[error("upstream error: {0}")]
    UpstreamError(String),

    /// The request arrived while the gateway is shutting down.
    #[error("gateway is shutting down")]
    Shutdown,

    /// Nothing else fit; the underlying cause is logged, not surfaced.
    #[error("internal error")]
    Internal(String),
}

impl GatewayError {
    /// The `error.type` field of the OpenAI-style error envelope.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) | Self::PayloadTooLarge => "invalid_request_error",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::QueueFull
            | Self::QueueTimeout
            | Self::ExecutionTimeout
            | Self::UpstreamError(_)
            | Self::Shutdown
            | Self::Internal(_) => "server_error",
        }
    }

    /// A short machine-readable code distinguishing `server_error` variants.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::QueueFull => Some("queue_full"),
            Self::QueueTimeout => Some("queue_timeout"),
            Self::ExecutionTimeout => Some("execution_timeout"),
            Self::UpstreamError(_) => Some("upstream_error"),
            Self::Shutdown => Some("shutdown"),
            _ => None,
        }
    }
}

impl From<ExecutorError> for GatewayError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::InvalidArgument { param, reason } => {
                Self::InvalidArgument(format!("invalid parameter '{param}': {reason}"))
            }
            ExecutorError::EmptyQuery => Self::InvalidArgument("query must not be empty".into()),
            ExecutorError::NoUserMessage => {
                Self::InvalidArgument("cannot resume session: no prior user message".into())
            }
            ExecutorError::Timeout { .. } => Self::ExecutionTimeout,
            ExecutorError::StdinWriteError(msg) => Self::Internal(msg),
            ExecutorError::SpawnFailed(msg) => Self::Internal(msg),
            ExecutorError::NonZeroExit { message, .. } => Self::UpstreamError(message),
        }
    }
}

impl From<PoolError> for GatewayError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::QueueFull => Self::QueueFull,
            PoolError::QueueTimeout => Self::QueueTimeout,
            PoolError::Shutdown => Self::Shutdown,
            PoolError::Executor(e) => e.into(),
        }
    }
}

impl From<RemoteError> for GatewayError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Request(e) => Self::UpstreamError(e.to_string()),
            RemoteError::Api { status, message } => {
                let truncated: String = message.chars().take(500).collect();
                Self::UpstreamError(format!("HTTP {status}: {truncated}"))
            }
            RemoteError::RateLimited { retry_after_secs } => Self::RateLimited { retry_after_secs },
            RemoteError::Parse(msg) => Self::UpstreamError(msg),
        }
    }
}

impl From<RouterError> for GatewayError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::NoBackendAvailable => Self::Internal(err.to_string()),
            RouterError::UnknownBackend(name) => {
                Self::InvalidArgument(format!("unknown backend: {name}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_missing_field_message() {
        let err = ConfigError::MissingField {
            field: "backends".to_string(),
        };
        assert_eq!(err.to_string(), "missing required config field: backends");
    }

    #[test]
    fn executor_error_invalid_argument_message() {
        let err = ExecutorError::InvalidArgument {
            param: "jsonSchema".to_string(),
            reason: "contains shell metacharacters".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid argument 'jsonSchema': contains shell metacharacters"
        );
    }

    #[test]
    fn gateway_error_type_mapping() {
        assert_eq!(
            GatewayError::InvalidArgument("x".into()).error_type(),
            "invalid_request_error"
        );
        assert_eq!(
            GatewayError::RateLimited { retry_after_secs: 1 }.error_type(),
            "rate_limit_error"
        );
        assert_eq!(GatewayError::QueueFull.error_type(), "server_error");
        assert_eq!(GatewayError::QueueFull.code(), Some("queue_full"));
        assert_eq!(GatewayError::Shutdown.code(), Some("shutdown"));
        assert_eq!(GatewayError::InvalidArgument("x".into()).code(), None);
    }

    #[test]
    fn executor_timeout_maps_to_execution_timeout() {
        let err: GatewayError = ExecutorError::Timeout { timeout_ms: 120_000 }.into();
        assert!(matches!(err, GatewayError::ExecutionTimeout));
    }

    #[test]
    fn pool_queue_full_maps_through() {
        let err: GatewayError = PoolError::QueueFull.into();
        assert!(matches!(err, GatewayError::QueueFull));
    }

    #[test]
    fn remote_api_error_truncates_long_messages() {
        let long_message = "x".repeat(1000);
        let err: GatewayError = RemoteError::Api {
            status: 500,
            message: long_message,
        }
        .into();
        match err {
            GatewayError::UpstreamError(msg) => assert!(msg.len() < 520),
            other => panic!("expected UpstreamError, got {other:?}"),
        }
    }
}
