//! Anthropic Messages API adapter.
//!
//! Differs from the OpenAI encoding in two ways: the API key travels in the
//! `x-api-key` header, and system messages are lifted out of the message
//! list into the top-level `system` field.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    ChatRole, FinishReason, LlmRequest, LlmResponse, ProviderConfig, ProviderKind, TokenUsage,
};
use crate::domain::ports::ProviderAdapter;

use super::classify_http_status;

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter {
    config: ProviderConfig,
    client: Client,
    initialized: AtomicBool,
}

impl AnthropicAdapter {
    pub fn from_config(config: ProviderConfig) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.settings.timeout_ms))
            .build()
            .map_err(|e| CoreError::ProviderError {
                provider: config.name.clone(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            config,
            client,
            initialized: AtomicBool::new(false),
        })
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/');
        format!("{base}/v1/messages")
    }

    fn api_key(&self) -> CoreResult<&str> {
        self.config
            .credentials
            .get("api_key")
            .map(String::as_str)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CoreError::ProviderError {
                provider: self.config.name.clone(),
                message: "missing credential 'api_key'".to_string(),
            })
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    stop_sequences: &'a [String],
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    model: String,
    content: Vec<WireContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Split system messages from the conversation turns.
fn encode_messages(request: &LlmRequest) -> (Option<String>, Vec<WireMessage<'_>>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut turns = Vec::new();
    for message in &request.messages {
        match message.role {
            ChatRole::System => system_parts.push(&message.content),
            ChatRole::User => turns.push(WireMessage {
                role: "user",
                content: &message.content,
            }),
            ChatRole::Assistant => turns.push(WireMessage {
                role: "assistant",
                content: &message.content,
            }),
        }
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, turns)
}

fn finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("end_turn") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("stop_sequence") => FinishReason::StopSequence,
        _ => FinishReason::Other,
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn initialize(&self) -> CoreResult<()> {
        self.api_key()?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, request: &LlmRequest) -> CoreResult<LlmResponse> {
        let model = request.model.as_deref().unwrap_or(&self.config.model);
        let (system, messages) = encode_messages(request);
        let body = WireRequest {
            model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system,
            temperature: request.temperature,
            stop_sequences: &request.stop_sequences,
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", self.api_key()?)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(&self.config, &e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_http_status(&self.config.name, status, &detail));
        }

        let wire: WireResponse = response.json().await.map_err(|e| CoreError::ProviderError {
            provider: self.config.name.clone(),
            message: format!("malformed response: {e}"),
        })?;

        let content: String = wire
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect();
        let usage = wire.usage.unwrap_or_default();

        Ok(LlmResponse {
            content,
            model: wire.model,
            usage: TokenUsage {
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
                total_tokens: usage.input_tokens + usage.output_tokens,
            },
            finish_reason: finish_reason(wire.stop_reason.as_deref()),
            provider: self.config.name.clone(),
            latency_ms: 0,
        })
    }

    async fn test(&self) -> CoreResult<()> {
        let probe = LlmRequest {
            messages: vec![crate::domain::models::ChatMessage::user("ping")],
            max_tokens: Some(1),
            ..LlmRequest::default()
        };
        self.execute(&probe).await.map(|_| ())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

fn request_error(config: &ProviderConfig, err: &reqwest::Error) -> CoreError {
    if err.is_timeout() {
        CoreError::Timeout(config.settings.timeout_ms)
    } else {
        CoreError::TransientServer {
            provider: config.name.clone(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ChatMessage;

    fn config() -> ProviderConfig {
        let mut config =
            ProviderConfig::new("anthropic-main", ProviderKind::Anthropic, "claude-sonnet-4-5");
        config
            .credentials
            .insert("api_key".to_string(), "sk-ant-test".to_string());
        config
    }

    #[tokio::test]
    async fn test_initialize_requires_api_key() {
        let mut config = config();
        config.credentials.clear();
        let adapter = AnthropicAdapter::from_config(config).unwrap();
        assert!(adapter.initialize().await.is_err());
    }

    #[test]
    fn test_system_messages_are_lifted() {
        let request = LlmRequest {
            messages: vec![
                ChatMessage::system("you are terse"),
                ChatMessage::user("hello"),
                ChatMessage::assistant("hi"),
                ChatMessage::system("stay terse"),
            ],
            ..LlmRequest::default()
        };
        let (system, turns) = encode_messages(&request);
        assert_eq!(system.as_deref(), Some("you are terse\n\nstay terse"));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[1].role, "assistant");
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(finish_reason(Some("end_turn")), FinishReason::Stop);
        assert_eq!(finish_reason(Some("max_tokens")), FinishReason::Length);
        assert_eq!(finish_reason(Some("stop_sequence")), FinishReason::StopSequence);
        assert_eq!(finish_reason(None), FinishReason::Other);
    }

    #[test]
    fn test_endpoint_default() {
        let adapter = AnthropicAdapter::from_config(config()).unwrap();
        assert_eq!(adapter.endpoint(), "https://api.anthropic.com/v1/messages");
    }
}
