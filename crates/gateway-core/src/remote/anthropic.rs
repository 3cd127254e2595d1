//! Anthropic remote backend, using the distinct Messages API wire format.

use super::{RemoteBackend, RemoteParams, RemoteResponse, RemoteUsage};
use crate::error::RemoteError;
use crate::executor::Message;
use serde::{Deserialize, Serialize};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A remote backend speaking the Anthropic Messages API.
pub struct AnthropicBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicBackend {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            api_key,
            model,
        }
    }

    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
        }
    }
}

#[async_trait::async_trait]
impl RemoteBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, messages: &[Message], params: &RemoteParams) -> Result<RemoteResponse, RemoteError> {
        let (system, rest) = split_system(messages);

        tracing::debug!(
            provider = "anthropic",
            model = %self.model,
            max_tokens = params.max_tokens,
            "remote completion request",
        );

        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: params.max_tokens,
            system: system.as_deref(),
            messages: rest
                .iter()
                .map(|m| AnthropicMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            temperature: params.temperature,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();

            if status == 429 || status == 529 {
                let retry_after = if status == 529 {
                    30
                } else {
                    response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(60)
                };
                return Err(RemoteError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }

            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnthropicErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            return Err(RemoteError::Api { status, message });
        }

        let body: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(format!("failed to parse Anthropic response: {e}")))?;

        let text = body
            .content
            .into_iter()
            .filter(|b| b.block_type == "text")
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");

        let usage = body.usage.map_or_else(RemoteUsage::default, |u| RemoteUsage {
            input_tokens: u64::from(u.input_tokens.unwrap_or(0)),
            output_tokens: u64::from(u.output_tokens.unwrap_or(0)),
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

/// Anthropic's wire format carries the system prompt as a top-level field,
/// separate from the message array; pull out a leading `role=system`
/// message if present.
fn split_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    if let Some(first) = messages.first() {
        if first.role == "system" {
            return (Some(first.content.clone()), messages[1..].iter().collect());
        }
    }
    (None, messages.iter().collect())
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<AnthropicMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicErrorDetail,
}

#[derive(Deserialize)]
struct AnthropicErrorDetail {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn user_msg(content: &str) -> Message {
        Message {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn complete_success() {
        let server = MockServer::start().await;

        let body = serde_json::json!({
            "content": [{"type": "text", "text": "Hello from Claude"}],
            "model": "claude-sonnet-4-5-20250514",
            "usage": {"input_tokens": 15, "output_tokens": 8}
        });

        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let backend = AnthropicBackend::with_base_url(
            "test-key".into(),
            "claude-sonnet-4-5-20250514".into(),
            server.uri(),
        );

        let resp = backend
            .complete(&[user_msg("hello")], &RemoteParams::default())
            .await
            .expect("complete");

        assert_eq!(resp.text, "Hello from Claude");
        assert_eq!(resp.model, "claude-sonnet-4-5-20250514");
        assert_eq!(resp.usage.input_tokens, 15);
        assert_eq!(resp.usage.output_tokens, 8);
    }

    #[tokio::test]
    async fn error_529_maps_to_rate_limited_with_default_retry() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_json(serde_json::json!({
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .mount(&server)
            .await;

        let backend = AnthropicBackend::with_base_url("key".into(), "model".into(), server.uri());

        let err = backend
            .complete(&[user_msg("hello")], &RemoteParams::default())
            .await
            .unwrap_err();

        match err {
            RemoteError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 30),
            other => panic!("expected RateLimited, got: {other}"),
        }
    }

    #[tokio::test]
    async fn error_401_maps_to_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"type": "authentication_error", "message": "Invalid API key"}
            })))
            .mount(&server)
            .await;

        let backend = AnthropicBackend::with_base_url("bad-key".into(), "model".into(), server.uri());

        let err = backend
            .complete(&[user_msg("hello")], &RemoteParams::default())
            .await
            .unwrap_err();

        match err {
            RemoteError::Api { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("Invalid API key"));
            }
            other => panic!("expected Api, got: {other}"),
        }
    }

    #[test]
    fn split_system_extracts_leading_system_message() {
        let messages = vec![
            Message {
                role: "system".to_string(),
                content: "be nice".to_string(),
            },
            user_msg("hello"),
        ];
        let (system, rest) = split_system(&messages);
        assert_eq!(system.as_deref(), Some("be nice"));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn split_system_none_when_no_system_message() {
        let messages = vec![user_msg("hello")];
        let (system, rest) = split_system(&messages);
        assert!(system.is_none());
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn provider_name() {
        let backend = AnthropicBackend::new("key".into(), "model".into());
        assert_eq!(backend.name(), "anthropic");
    }
}
