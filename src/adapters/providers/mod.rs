//! Provider adapters: OpenAI, Anthropic, local inference servers, and the
//! scripted mock.

pub mod anthropic;
pub mod local;
pub mod mock;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use local::LocalAdapter;
pub use mock::MockProviderAdapter;
pub use openai::OpenAiAdapter;

use reqwest::StatusCode;
use std::sync::Arc;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{CoreConfig, ProviderConfig, ProviderKind};
use crate::domain::ports::ProviderAdapter;
use crate::services::event_bus::EventBus;
use crate::services::provider_registry::ProviderRegistry;

/// Map an HTTP error status to the error taxonomy: 408/429/5xx are
/// retryable, other 4xx are not.
pub(crate) fn classify_http_status(provider: &str, status: StatusCode, detail: &str) -> CoreError {
    let message = if detail.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {detail}")
    };
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        CoreError::TransientServer {
            provider: provider.to_string(),
            message,
        }
    } else {
        CoreError::ProviderError {
            provider: provider.to_string(),
            message,
        }
    }
}

/// Construct the adapter matching a provider config.
pub fn build_adapter(config: ProviderConfig) -> CoreResult<Arc<dyn ProviderAdapter>> {
    Ok(match config.kind {
        ProviderKind::OpenAi => Arc::new(OpenAiAdapter::from_config(config)?),
        ProviderKind::Anthropic => Arc::new(AnthropicAdapter::from_config(config)?),
        ProviderKind::Local => Arc::new(LocalAdapter::from_config(config)?),
    })
}

/// Build a registry from configuration: one adapter per provider entry, the
/// configured active provider selected.
pub async fn build_registry(config: &CoreConfig, bus: Arc<EventBus>) -> CoreResult<ProviderRegistry> {
    let registry = ProviderRegistry::new(bus, config.rate_limit.clone(), config.breaker.clone());
    for provider in &config.providers {
        let settings = provider.settings.clone();
        let adapter = build_adapter(provider.clone())?;
        registry.register(adapter, settings).await?;
    }
    if let Some(ref active) = config.active_provider {
        registry.set_active(active).await?;
    }
    Ok(registry)
}
