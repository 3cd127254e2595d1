//! The request-log sink contract. Persistent logging (SQLite-backed) is an
//! external collaborator implemented by the server crate; this module only
//! fixes the record shape and a no-op default.

use async_trait::async_trait;

/// One request's outcome, emitted exactly once per request by the pipeline.
#[derive(Debug, Clone)]
pub struct RequestLogRecord {
    pub backend: String,
    pub decision_reason: String,
    pub duration_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub is_fallback: bool,
    pub error: Option<String>,
}

/// Consumes completed request records. Implementations may additionally
/// persist them (see `ENABLE_SQLITE_LOGGING`/`DATABASE_PATH`); a sink must
/// never allow a logging failure to affect the response already sent to
/// the client.
#[async_trait]
pub trait RequestLogSink: Send + Sync {
    async fn record(&self, record: RequestLogRecord);
}

/// A sink that discards every record, used when no persistent logging is
/// configured.
pub struct NullLogSink;

#[async_trait]
impl RequestLogSink for NullLogSink {
    async fn record(&self, _record: RequestLogRecord) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_sink_accepts_any_record() {
        let sink = NullLogSink;
        sink.record(RequestLogRecord {
            backend: "claude-cli".to_string(),
            decision_reason: "tool-capable backend with capacity".to_string(),
            duration_ms: 42,
            input_tokens: 10,
            output_tokens: 5,
            cost_usd: 0.001,
            is_fallback: false,
            error: None,
        })
        .await;
    }
}
