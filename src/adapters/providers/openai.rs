//! OpenAI chat-completions adapter.

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

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter {
    config: ProviderConfig,
    client: Client,
    initialized: AtomicBool,
}

impl OpenAiAdapter {
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
        format!("{base}/chat/completions")
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
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    stop: &'a [String],
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    model: String,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

fn finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("content_filter" | "tool_calls") | None => FinishReason::Other,
        Some(_) => FinishReason::Other,
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
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
        let body = WireRequest {
            model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: role_name(m.role),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stop: &request.stop_sequences,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key()?)
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

        let choice = wire.choices.into_iter().next().ok_or_else(|| {
            CoreError::ProviderError {
                provider: self.config.name.clone(),
                message: "response contained no choices".to_string(),
            }
        })?;
        let usage = wire.usage.unwrap_or_default();

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            model: wire.model,
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            finish_reason: finish_reason(choice.finish_reason.as_deref()),
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
