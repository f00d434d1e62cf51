//! Scripted mock provider for tests and offline runs.
//!
//! Outcomes are consumed from a queue; when the queue is empty the adapter
//! falls back to its default behavior (echoing a canned response).

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::Mutex;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{FinishReason, LlmRequest, LlmResponse, ProviderKind, TokenUsage};
use crate::domain::ports::ProviderAdapter;

type Outcome = Box<dyn FnOnce() -> CoreResult<LlmResponse> + Send>;

pub struct MockProviderAdapter {
    name: String,
    model: String,
    script: Mutex<VecDeque<Outcome>>,
    default_content: String,
    calls: AtomicU32,
    initialized: AtomicBool,
    fail_initialize: bool,
}

impl MockProviderAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: "mock-model".to_string(),
            script: Mutex::new(VecDeque::new()),
            default_content: "mock response".to_string(),
            calls: AtomicU32::new(0),
            initialized: AtomicBool::new(false),
            fail_initialize: false,
        }
    }

    /// An adapter whose `initialize` always fails (exercises the skip path
    /// in the failover chain).
    pub fn broken(name: impl Into<String>) -> Self {
        Self {
            fail_initialize: true,
            ..Self::new(name)
        }
    }

    pub fn with_default_content(mut self, content: impl Into<String>) -> Self {
        self.default_content = content.into();
        self
    }

    /// Queue a successful response.
    pub async fn enqueue_success(&self, content: impl Into<String>) {
        let content = content.into();
        let model = self.model.clone();
        self.script.lock().await.push_back(Box::new(move || {
            Ok(mock_response(&content, &model))
        }));
    }

    /// Queue a failure built by `make`.
    pub async fn enqueue_error<F>(&self, make: F)
    where
        F: FnOnce() -> CoreError + Send + 'static,
    {
        self.script
            .lock()
            .await
            .push_back(Box::new(move || Err(make())));
    }

    /// Queue `count` transient server failures.
    pub async fn enqueue_transient_failures(&self, count: usize) {
        for _ in 0..count {
            let provider = self.name.clone();
            self.enqueue_error(move || CoreError::TransientServer {
                provider,
                message: "simulated 503".to_string(),
            })
            .await;
        }
    }

    /// How many times `execute` has been invoked.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

fn mock_response(content: &str, model: &str) -> LlmResponse {
    LlmResponse {
        content: content.to_string(),
        model: model.to_string(),
        usage: TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 20,
            total_tokens: 30,
        },
        finish_reason: FinishReason::Stop,
        provider: String::new(),
        latency_ms: 0,
    }
}

#[async_trait]
impl ProviderAdapter for MockProviderAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn initialize(&self) -> CoreResult<()> {
        if self.fail_initialize {
            return Err(CoreError::ProviderError {
                provider: self.name.clone(),
                message: "mock initialize failure".to_string(),
            });
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, _request: &LlmRequest) -> CoreResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().await.pop_front();
        match scripted {
            Some(outcome) => outcome(),
            None => Ok(mock_response(&self.default_content, &self.model)),
        }
    }

    async fn test(&self) -> CoreResult<()> {
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_outcomes_then_default() {
        let adapter = MockProviderAdapter::new("mock");
        adapter.initialize().await.unwrap();
        adapter.enqueue_success("first").await;
        adapter.enqueue_transient_failures(1).await;

        let request = LlmRequest::from_prompt("hi");
        assert_eq!(adapter.execute(&request).await.unwrap().content, "first");
        assert!(adapter.execute(&request).await.is_err());
        assert_eq!(
            adapter.execute(&request).await.unwrap().content,
            "mock response"
        );
        assert_eq!(adapter.calls(), 3);
    }

    #[tokio::test]
    async fn test_broken_adapter_never_initializes() {
        let adapter = MockProviderAdapter::broken("broken");
        assert!(adapter.initialize().await.is_err());
        assert!(!adapter.is_initialized());
    }
}
