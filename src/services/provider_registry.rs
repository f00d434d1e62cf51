//! Provider registry: uniform adapter map with failover, rate limiting, and
//! circuit-breaker protection.
//!
//! The failover chain is preferred provider, then the active provider, then
//! the remaining providers in registration order. Open breakers are skipped
//! without touching the adapter. Attempts fall through on retryable errors
//! and stop on the first success or the first non-retryable error.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use async_trait::async_trait;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    BreakerSettings, LlmRequest, LlmResponse, ProviderSettings, ProviderStatus, RateLimitSettings,
};
use crate::domain::ports::{CompletionBackend, ProviderAdapter};
use crate::services::circuit_breaker::{Admission, CircuitBreaker};
use crate::services::event_bus::{EventBus, EventPayload};
use crate::services::rate_limiter::{ConsumeOutcome, TokenBucket};

const COMPONENT: &str = "provider-registry";

/// Tokens one completion call consumes from the bucket.
const DEFAULT_CALL_COST: f64 = 1.0;

struct RegisteredProvider {
    adapter: Arc<dyn ProviderAdapter>,
    settings: ProviderSettings,
    bucket: TokenBucket,
    acquire_timeout_ms: u64,
    breaker: Mutex<CircuitBreaker>,
}

pub struct ProviderRegistry {
    providers: RwLock<Vec<Arc<RegisteredProvider>>>,
    active: RwLock<Option<String>>,
    rate_limit: RateLimitSettings,
    breaker: BreakerSettings,
    bus: Arc<EventBus>,
}

impl ProviderRegistry {
    pub fn new(
        bus: Arc<EventBus>,
        rate_limit: RateLimitSettings,
        breaker: BreakerSettings,
    ) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            active: RwLock::new(None),
            rate_limit,
            breaker,
            bus,
        }
    }

    /// Register an adapter and attempt to initialize it. An adapter whose
    /// initialization fails stays registered but is skipped by the failover
    /// chain until a later `initialize` succeeds. The first registered
    /// provider becomes active when none is set.
    pub async fn register(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        settings: ProviderSettings,
    ) -> CoreResult<()> {
        self.register_with_limits(adapter, settings, None, None).await
    }

    /// Register with provider-specific rate-limit and breaker settings
    /// overriding the registry defaults.
    pub async fn register_with_limits(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        settings: ProviderSettings,
        rate_limit: Option<RateLimitSettings>,
        breaker: Option<BreakerSettings>,
    ) -> CoreResult<()> {
        let name = adapter.name().to_string();
        {
            let providers = self.providers.read().await;
            if providers.iter().any(|p| p.adapter.name() == name) {
                return Err(CoreError::InvalidInput(format!(
                    "provider '{name}' is already registered"
                )));
            }
        }

        if let Err(error) = adapter.initialize().await {
            tracing::warn!(provider = %name, %error, "provider failed to initialize");
        }

        let rate_limit = rate_limit.unwrap_or_else(|| self.rate_limit.clone());
        let registered = Arc::new(RegisteredProvider {
            adapter,
            settings,
            bucket: TokenBucket::new(&rate_limit),
            acquire_timeout_ms: rate_limit.acquire_timeout_ms,
            breaker: Mutex::new(CircuitBreaker::new(
                breaker.unwrap_or_else(|| self.breaker.clone()),
            )),
        });
        self.providers.write().await.push(registered);

        let mut active = self.active.write().await;
        if active.is_none() {
            *active = Some(name);
        }
        Ok(())
    }

    /// Re-run initialization for a registered provider.
    pub async fn initialize(&self, name: &str) -> CoreResult<()> {
        let provider = self.get(name).await.ok_or_else(|| {
            CoreError::InvalidInput(format!("unknown provider '{name}'"))
        })?;
        provider.adapter.initialize().await
    }

    pub async fn set_active(&self, name: &str) -> CoreResult<()> {
        if self.get(name).await.is_none() {
            return Err(CoreError::InvalidInput(format!(
                "unknown provider '{name}'"
            )));
        }
        *self.active.write().await = Some(name.to_string());
        Ok(())
    }

    pub async fn active_provider(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    pub async fn provider_names(&self) -> Vec<String> {
        self.providers
            .read()
            .await
            .iter()
            .map(|p| p.adapter.name().to_string())
            .collect()
    }

    /// Liveness probe through the adapter's `test` capability.
    pub async fn test_provider(&self, name: &str) -> CoreResult<()> {
        let provider = self.get(name).await.ok_or_else(|| {
            CoreError::InvalidInput(format!("unknown provider '{name}'"))
        })?;
        provider.adapter.test().await
    }

    /// Status snapshot including breaker state and token balance.
    pub async fn provider_status(&self, name: &str) -> CoreResult<ProviderStatus> {
        let provider = self.get(name).await.ok_or_else(|| {
            CoreError::InvalidInput(format!("unknown provider '{name}'"))
        })?;
        let breaker_state = provider.breaker.lock().await.state();
        Ok(ProviderStatus {
            name: provider.adapter.name().to_string(),
            kind: provider.adapter.kind(),
            model: provider.adapter.model().to_string(),
            initialized: provider.adapter.is_initialized(),
            breaker_state: breaker_state.as_str().to_string(),
            tokens_available: provider.bucket.available().await,
        })
    }

    /// Run one completion through the failover chain.
    pub async fn complete(&self, request: &LlmRequest) -> CoreResult<LlmResponse> {
        let chain = self.failover_chain(request.preferred_provider.as_deref()).await;
        if chain.is_empty() {
            return Err(CoreError::NoProvidersAvailable(
                "no initialized providers registered".to_string(),
            ));
        }

        let mut last_failed: Option<String> = None;
        let mut errors: Vec<CoreError> = Vec::new();

        for provider in chain {
            let name = provider.adapter.name().to_string();

            match provider.breaker.lock().await.admit() {
                Admission::Allowed => {}
                Admission::Blocked => {
                    errors.push(CoreError::CircuitOpen(name.clone()));
                    last_failed = Some(name);
                    continue;
                }
            }

            if let Some(ref from) = last_failed {
                self.bus.publish(
                    COMPONENT,
                    EventPayload::ProviderFailover {
                        from: from.clone(),
                        to: name.clone(),
                    },
                );
            }

            if !self.acquire_token(&provider, &name).await {
                provider.breaker.lock().await.abort_probe();
                errors.push(CoreError::RateLimitTimeout(name.clone()));
                last_failed = Some(name);
                continue;
            }

            match self.attempt_provider(&provider, &name, request).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if !error.allows_failover() {
                        return Err(error);
                    }
                    errors.push(error);
                    last_failed = Some(name);
                }
            }
        }

        // A single candidate surfaces its concrete error; a longer exhausted
        // chain collapses into NoProvidersAvailable.
        if errors.len() == 1 {
            return Err(errors.remove(0));
        }
        let summary = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(CoreError::NoProvidersAvailable(summary))
    }

    /// Wait for a rate-limit token, emitting the bucket events.
    async fn acquire_token(&self, provider: &RegisteredProvider, name: &str) -> bool {
        if provider.bucket.available().await < DEFAULT_CALL_COST {
            self.bus.publish(
                COMPONENT,
                EventPayload::RateLimitExceeded {
                    provider: name.to_string(),
                },
            );
        }

        let timeout = Duration::from_millis(provider.acquire_timeout_ms);
        let started = Instant::now();
        match provider.bucket.try_consume(DEFAULT_CALL_COST, timeout).await {
            ConsumeOutcome::Consumed => {
                self.bus.publish(
                    COMPONENT,
                    EventPayload::RateLimitConsumed {
                        provider: name.to_string(),
                        remaining: provider.bucket.available().await,
                    },
                );
                true
            }
            ConsumeOutcome::TimedOut => {
                self.bus.publish(
                    COMPONENT,
                    EventPayload::RateLimitTimeout {
                        provider: name.to_string(),
                        waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    },
                );
                false
            }
        }
    }

    /// Run the per-provider retry loop: the initial attempt plus up to
    /// `settings.max_retries` retries with exponential delay, retryable
    /// errors only.
    async fn attempt_provider(
        &self,
        provider: &RegisteredProvider,
        name: &str,
        request: &LlmRequest,
    ) -> CoreResult<LlmResponse> {
        let settings = &provider.settings;
        let mut last_error: Option<CoreError> = None;

        for attempt in 0..=settings.max_retries {
            if attempt > 0 {
                let delay = settings
                    .retry_delay_ms
                    .saturating_mul(2_u64.saturating_pow(attempt - 1));
                tracing::debug!(provider = %name, attempt, delay_ms = delay, "retrying provider");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            self.bus.publish(
                COMPONENT,
                EventPayload::ProviderRequest {
                    provider: name.to_string(),
                    model: request
                        .model
                        .clone()
                        .unwrap_or_else(|| provider.adapter.model().to_string()),
                },
            );

            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                Duration::from_millis(settings.timeout_ms),
                provider.adapter.execute(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(CoreError::Timeout(settings.timeout_ms)),
            };

            match outcome {
                Ok(mut response) => {
                    let latency = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    response.provider = name.to_string();
                    response.latency_ms = latency;

                    let closed = provider.breaker.lock().await.record_success();
                    if closed {
                        self.bus.publish(
                            COMPONENT,
                            EventPayload::CircuitClosed {
                                provider: name.to_string(),
                            },
                        );
                    }
                    self.bus.publish(
                        COMPONENT,
                        EventPayload::ProviderResponse {
                            provider: name.to_string(),
                            latency_ms: latency,
                            total_tokens: response.usage.total_tokens,
                        },
                    );
                    return Ok(response);
                }
                Err(error) => {
                    let (opened, failure_count) = {
                        let mut breaker = provider.breaker.lock().await;
                        (breaker.record_failure(), breaker.consecutive_failures())
                    };
                    self.bus.publish(
                        COMPONENT,
                        EventPayload::ProviderError {
                            provider: name.to_string(),
                            error: error.to_string(),
                        },
                    );
                    if opened {
                        self.bus.publish(
                            COMPONENT,
                            EventPayload::CircuitOpened {
                                provider: name.to_string(),
                                failure_count,
                            },
                        );
                    }
                    tracing::warn!(provider = %name, attempt, %error, "provider call failed");

                    let may_retry_here = matches!(
                        error,
                        CoreError::Timeout(_) | CoreError::TransientServer { .. }
                    );
                    last_error = Some(error);
                    if !may_retry_here {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CoreError::NoProvidersAvailable(name.to_string())))
    }

    /// Failover order: preferred, then active, then the rest in registration
    /// order. Uninitialized adapters are skipped.
    async fn failover_chain(&self, preferred: Option<&str>) -> Vec<Arc<RegisteredProvider>> {
        let providers = self.providers.read().await;
        let active = self.active.read().await.clone();

        let mut order: Vec<Arc<RegisteredProvider>> = Vec::with_capacity(providers.len());
        let mut push = |candidate: &Arc<RegisteredProvider>,
                        order: &mut Vec<Arc<RegisteredProvider>>| {
            if candidate.adapter.is_initialized()
                && !order
                    .iter()
                    .any(|p| p.adapter.name() == candidate.adapter.name())
            {
                order.push(Arc::clone(candidate));
            }
        };

        if let Some(name) = preferred {
            if let Some(p) = providers.iter().find(|p| p.adapter.name() == name) {
                push(p, &mut order);
            }
        }
        if let Some(name) = active {
            if let Some(p) = providers.iter().find(|p| p.adapter.name() == name) {
                push(p, &mut order);
            }
        }
        for p in providers.iter() {
            push(p, &mut order);
        }
        order
    }

    async fn get(&self, name: &str) -> Option<Arc<RegisteredProvider>> {
        self.providers
            .read()
            .await
            .iter()
            .find(|p| p.adapter.name() == name)
            .map(Arc::clone)
    }
}

#[async_trait]
impl CompletionBackend for ProviderRegistry {
    async fn complete(&self, request: LlmRequest) -> CoreResult<LlmResponse> {
        ProviderRegistry::complete(self, &request).await
    }
}
