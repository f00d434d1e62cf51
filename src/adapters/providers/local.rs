//! Local provider adapter for OpenAI-compatible inference servers
//! (llama.cpp, vLLM, Ollama's compatibility endpoint). No credentials; the
//! endpoint must be reachable.

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

const DEFAULT_ENDPOINT: &str = "http://localhost:8080/v1";

pub struct LocalAdapter {
    config: ProviderConfig,
    client: Client,
    initialized: AtomicBool,
}

impl LocalAdapter {
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
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    model: Option<String>,
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

#[async_trait]
impl ProviderAdapter for LocalAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn initialize(&self) -> CoreResult<()> {
        // Nothing to validate beyond configuration shape; reachability is
        // checked by `test`.
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
                    role: match m.role {
                        ChatRole::System => "system",
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::Timeout(self.config.settings.timeout_ms)
                } else {
                    CoreError::TransientServer {
                        provider: self.config.name.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

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
            model: wire.model.unwrap_or_else(|| model.to_string()),
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            finish_reason: match choice.finish_reason.as_deref() {
                Some("stop") => FinishReason::Stop,
                Some("length") => FinishReason::Length,
                _ => FinishReason::Other,
            },
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
