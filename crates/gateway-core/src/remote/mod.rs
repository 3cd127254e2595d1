//! Remote HTTP backend adapters, one per provider family. Each implements
//! the [`RemoteBackend`] trait so the router and pipeline can treat every
//! API backend uniformly regardless of wire format.

pub mod anthropic;
pub mod openai_compat;
pub mod pricing;

use crate::error::RemoteError;
use crate::executor::Message;

/// Token usage reported by a remote completion.
#[derive(Debug, Clone, Default)]
pub struct RemoteUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Response from a remote backend's completion call.
#[derive(Debug, Clone)]
pub struct RemoteResponse {
    pub text: String,
    pub model: String,
    pub usage: RemoteUsage,
}

/// Generation parameters passed through to a remote completion call.
#[derive(Debug, Clone)]
pub struct RemoteParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for RemoteParams {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// A remote, directly-called (non-pooled) LLM backend.
#[async_trait::async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Display name of this provider family (e.g. `"anthropic"`, `"openai"`).
    fn name(&self) -> &str;

    /// Send the full message history as a completion request.
    async fn complete(&self, messages: &[Message], params: &RemoteParams) -> Result<RemoteResponse, RemoteError>;

    /// Probe reachability and credential validity with a minimal request.
    /// Never returns an error to its caller from the registry's
    /// perspective — the registry coerces failures to "unavailable"
    /// itself, so this trait method is free to propagate.
    async fn health_check(&self) -> Result<(), RemoteError>;
}
