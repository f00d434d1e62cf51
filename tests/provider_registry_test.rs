//! Provider registry integration: failover, rate limiting, and the circuit
//! breaker.

use std::sync::Arc;

use maestro::adapters::providers::MockProviderAdapter;
use maestro::domain::models::{
    BreakerSettings, LlmRequest, ProviderSettings, RateLimitSettings,
};
use maestro::domain::errors::CoreError;
use maestro::services::{EventBus, EventPayload, ProviderRegistry};

fn generous_rate_limit() -> RateLimitSettings {
    RateLimitSettings {
        max_tokens: 1000.0,
        refill_rate: 1000.0,
        refill_interval_ms: 1_000,
        acquire_timeout_ms: 1_000,
    }
}

fn starved_rate_limit() -> RateLimitSettings {
    RateLimitSettings {
        max_tokens: 0.0,
        refill_rate: 0.001,
        refill_interval_ms: 1_000,
        acquire_timeout_ms: 30,
    }
}

fn fast_settings() -> ProviderSettings {
    ProviderSettings {
        timeout_ms: 1_000,
        max_retries: 0,
        retry_delay_ms: 1,
    }
}

fn registry(bus: &Arc<EventBus>) -> ProviderRegistry {
    ProviderRegistry::new(
        bus.clone(),
        generous_rate_limit(),
        BreakerSettings::default(),
    )
}

async fn drain_kinds(rx: &mut tokio::sync::broadcast::Receiver<maestro::services::CoreEvent>) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.payload.kind());
    }
    kinds
}

#[tokio::test]
async fn test_single_provider_success() {
    let bus = Arc::new(EventBus::default());
    let registry = registry(&bus);
    let adapter = Arc::new(MockProviderAdapter::new("alpha").with_default_content("hello"));
    registry.register(adapter, fast_settings()).await.unwrap();

    let response = registry
        .complete(&LlmRequest::from_prompt("hi"))
        .await
        .unwrap();
    assert_eq!(response.content, "hello");
    assert_eq!(response.provider, "alpha");
    assert_eq!(response.usage.total_tokens, 30);
}

#[tokio::test]
async fn test_failover_from_rate_limited_provider() {
    let bus = Arc::new(EventBus::default());
    let registry = registry(&bus);
    let mut rx = bus.subscribe();

    // Provider A can never obtain a token; provider B always succeeds.
    let slow = Arc::new(MockProviderAdapter::new("alpha"));
    let good = Arc::new(MockProviderAdapter::new("beta").with_default_content("from beta"));
    registry
        .register_with_limits(slow.clone(), fast_settings(), Some(starved_rate_limit()), None)
        .await
        .unwrap();
    registry.register(good, fast_settings()).await.unwrap();

    let response = registry
        .complete(&LlmRequest::from_prompt("hi"))
        .await
        .unwrap();
    assert_eq!(response.provider, "beta");
    assert_eq!(response.content, "from beta");
    // The rate-limited provider never reached its adapter.
    assert_eq!(slow.calls(), 0);

    let mut saw_failover = false;
    while let Ok(event) = rx.try_recv() {
        if let EventPayload::ProviderFailover { from, to } = &event.payload {
            assert_eq!(from, "alpha");
            assert_eq!(to, "beta");
            saw_failover = true;
        }
    }
    assert!(saw_failover, "expected a provider.failover event");
}

#[tokio::test]
async fn test_failover_on_transient_errors() {
    let bus = Arc::new(EventBus::default());
    let registry = registry(&bus);

    let failing = Arc::new(MockProviderAdapter::new("alpha"));
    failing.enqueue_transient_failures(10).await;
    let good = Arc::new(MockProviderAdapter::new("beta").with_default_content("ok"));

    registry.register(failing.clone(), fast_settings()).await.unwrap();
    registry.register(good.clone(), fast_settings()).await.unwrap();

    let response = registry
        .complete(&LlmRequest::from_prompt("hi"))
        .await
        .unwrap();
    assert_eq!(response.provider, "beta");
    assert_eq!(failing.calls(), 1);
    assert_eq!(good.calls(), 1);
}

#[tokio::test]
async fn test_non_retryable_error_stops_failover() {
    let bus = Arc::new(EventBus::default());
    let registry = registry(&bus);

    let auth_broken = Arc::new(MockProviderAdapter::new("alpha"));
    auth_broken
        .enqueue_error(|| CoreError::ProviderError {
            provider: "alpha".into(),
            message: "invalid api key".into(),
        })
        .await;
    let never_reached = Arc::new(MockProviderAdapter::new("beta"));

    registry.register(auth_broken, fast_settings()).await.unwrap();
    registry
        .register(never_reached.clone(), fast_settings())
        .await
        .unwrap();

    let err = registry
        .complete(&LlmRequest::from_prompt("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ProviderError { .. }));
    assert_eq!(never_reached.calls(), 0);
}

#[tokio::test]
async fn test_preferred_provider_is_tried_first() {
    let bus = Arc::new(EventBus::default());
    let registry = registry(&bus);

    let first = Arc::new(MockProviderAdapter::new("alpha").with_default_content("from alpha"));
    let second = Arc::new(MockProviderAdapter::new("beta").with_default_content("from beta"));
    registry.register(first.clone(), fast_settings()).await.unwrap();
    registry.register(second, fast_settings()).await.unwrap();

    let request = LlmRequest {
        preferred_provider: Some("beta".into()),
        ..LlmRequest::from_prompt("hi")
    };
    let response = registry.complete(&request).await.unwrap();
    assert_eq!(response.provider, "beta");
    assert_eq!(first.calls(), 0);
}

#[tokio::test]
async fn test_uninitialized_provider_is_skipped() {
    let bus = Arc::new(EventBus::default());
    let registry = registry(&bus);

    let broken = Arc::new(MockProviderAdapter::broken("alpha"));
    let good = Arc::new(MockProviderAdapter::new("beta").with_default_content("ok"));
    registry.register(broken, fast_settings()).await.unwrap();
    registry.register(good, fast_settings()).await.unwrap();

    let response = registry
        .complete(&LlmRequest::from_prompt("hi"))
        .await
        .unwrap();
    assert_eq!(response.provider, "beta");
}

#[tokio::test]
async fn test_retry_attempt_bound_invariant() {
    let bus = Arc::new(EventBus::default());
    let registry = registry(&bus);

    let settings = ProviderSettings {
        timeout_ms: 1_000,
        max_retries: 2,
        retry_delay_ms: 1,
    };
    let alpha = Arc::new(MockProviderAdapter::new("alpha"));
    alpha.enqueue_transient_failures(20).await;
    let beta = Arc::new(MockProviderAdapter::new("beta"));
    beta.enqueue_transient_failures(20).await;

    registry.register(alpha.clone(), settings.clone()).await.unwrap();
    registry.register(beta.clone(), settings).await.unwrap();

    let err = registry
        .complete(&LlmRequest::from_prompt("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoProvidersAvailable(_)));

    // totalAttempts <= sum(maxRetries) + provider count = 4 + 2.
    let total = alpha.calls() + beta.calls();
    assert_eq!(total, 6);
}

#[tokio::test]
async fn test_breaker_opens_after_five_failures_and_recovers() {
    let bus = Arc::new(EventBus::default());
    let registry = ProviderRegistry::new(
        bus.clone(),
        generous_rate_limit(),
        BreakerSettings {
            failure_threshold: 5,
            cooldown_ms: 50,
            success_threshold: 1,
        },
    );
    let mut rx = bus.subscribe();

    let adapter = Arc::new(MockProviderAdapter::new("alpha").with_default_content("recovered"));
    adapter.enqueue_transient_failures(5).await;
    registry.register(adapter.clone(), fast_settings()).await.unwrap();

    // Five failing calls trip the breaker.
    for _ in 0..5 {
        let err = registry
            .complete(&LlmRequest::from_prompt("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::TransientServer { .. }));
    }
    assert_eq!(adapter.calls(), 5);

    let kinds = drain_kinds(&mut rx).await;
    assert_eq!(
        kinds.iter().filter(|k| **k == "provider.error").count(),
        5
    );
    assert!(kinds.contains(&"provider.circuit.opened"));

    // Within the cooldown the adapter is never invoked.
    let err = registry
        .complete(&LlmRequest::from_prompt("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CircuitOpen(_)));
    assert_eq!(adapter.calls(), 5);

    let status = registry.provider_status("alpha").await.unwrap();
    assert_eq!(status.breaker_state, "open");

    // After the cooldown a successful probe closes the circuit.
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    let response = registry
        .complete(&LlmRequest::from_prompt("hi"))
        .await
        .unwrap();
    assert_eq!(response.content, "recovered");

    let kinds = drain_kinds(&mut rx).await;
    assert!(kinds.contains(&"provider.circuit.closed"));
    let status = registry.provider_status("alpha").await.unwrap();
    assert_eq!(status.breaker_state, "closed");
}

#[tokio::test]
async fn test_rate_limit_events_emitted() {
    let bus = Arc::new(EventBus::default());
    let registry = ProviderRegistry::new(
        bus.clone(),
        RateLimitSettings {
            max_tokens: 1.0,
            refill_rate: 1.0,
            refill_interval_ms: 1_000,
            acquire_timeout_ms: 20,
        },
        BreakerSettings::default(),
    );
    let mut rx = bus.subscribe();

    let adapter = Arc::new(MockProviderAdapter::new("alpha"));
    registry.register(adapter, fast_settings()).await.unwrap();

    // First call consumes the only token; second times out waiting.
    registry.complete(&LlmRequest::from_prompt("a")).await.unwrap();
    let err = registry
        .complete(&LlmRequest::from_prompt("b"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::RateLimitTimeout(_)));

    let kinds = drain_kinds(&mut rx).await;
    assert!(kinds.contains(&"provider.rateLimit.consumed"));
    assert!(kinds.contains(&"provider.rateLimit.exceeded"));
    assert!(kinds.contains(&"provider.rateLimit.timeout"));
}

#[tokio::test]
async fn test_no_providers_registered() {
    let bus = Arc::new(EventBus::default());
    let registry = registry(&bus);
    let err = registry
        .complete(&LlmRequest::from_prompt("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoProvidersAvailable(_)));
}

#[tokio::test]
async fn test_provider_status_reports_model_and_tokens() {
    let bus = Arc::new(EventBus::default());
    let registry = registry(&bus);
    registry
        .register(Arc::new(MockProviderAdapter::new("alpha")), fast_settings())
        .await
        .unwrap();

    let status = registry.provider_status("alpha").await.unwrap();
    assert_eq!(status.name, "alpha");
    assert_eq!(status.model, "mock-model");
    assert!(status.initialized);
    assert_eq!(status.breaker_state, "closed");
    assert!(status.tokens_available > 0.0);

    assert!(registry.provider_status("ghost").await.is_err());
    assert_eq!(registry.active_provider().await.as_deref(), Some("alpha"));
}
