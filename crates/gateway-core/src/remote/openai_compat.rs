//! OpenAI-compatible remote backend.
//!
//! Works with OpenAI's own API and any OpenAI-compatible endpoint since
//! they share the same chat completions request/response format.

use super::{RemoteBackend, RemoteParams, RemoteResponse, RemoteUsage};
use crate::error::RemoteError;
use crate::executor::Message;
use serde::{Deserialize, Serialize};

/// A remote backend speaking the OpenAI chat completions wire format.
pub struct OpenAiCompatBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    provider_name: String,
}

impl OpenAiCompatBackend {
    pub fn new(base_url: String, api_key: String, model: String, provider_name: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
            provider_name,
        }
    }
}

#[async_trait::async_trait]
impl RemoteBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn complete(&self, messages: &[Message], params: &RemoteParams) -> Result<RemoteResponse, RemoteError> {
        tracing::debug!(
            provider = %self.provider_name,
            model = %self.model,
            max_tokens = params.max_tokens,
            "remote completion request",
        );

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();

            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                return Err(RemoteError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }

            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api {
                status,
                message: body,
            });
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(format!("failed to parse response: {e}")))?;

        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let usage = body.usage.map_or_else(RemoteUsage::default, |u| RemoteUsage {
            input_tokens: u64::from(u.prompt_tokens.unwrap_or(0)),
            output_tokens: u64::from(u.completion_tokens.unwrap_or(0)),
        });

        Ok(RemoteResponse {
            text,
            model: body.model,
            usage,
        })
    }

    async fn health_check(&self) -> Result<(), RemoteError> {
        let probe = [Message {
            role: "user".to_string(),
            content: "Say OK".to_string(),
        }];
        self.complete(
            &probe,
            &RemoteParams {
                max_tokens: 10,
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}
