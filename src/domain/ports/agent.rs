//! Agent handler port and the execution context passed to handlers.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::CoreResult;
use crate::domain::models::{
    AgentId, AgentOutcome, AgentTask, LlmRequest, LlmResponse, MemoryRecord, RecordPatch,
    SearchQuery,
};

/// Completion surface an agent sees. Implemented by the provider registry;
/// tests substitute scripted backends.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> CoreResult<LlmResponse>;
}

/// Shared-memory surface an agent sees. Implemented by the memory service.
#[async_trait]
pub trait SharedMemory: Send + Sync {
    async fn put(&self, record: MemoryRecord, owner: &AgentId) -> CoreResult<Uuid>;

    async fn get(&self, id: Uuid, agent: &AgentId) -> CoreResult<MemoryRecord>;

    async fn update(&self, id: Uuid, patch: RecordPatch, agent: &AgentId) -> CoreResult<()>;

    async fn search_similar(
        &self,
        query: SearchQuery,
        category: Option<&str>,
        k: usize,
        agent: &AgentId,
    ) -> CoreResult<Vec<MemoryRecord>>;
}

/// Execution context threaded into every agent invocation.
///
/// Cancellation is cooperative: handlers must observe `cancel` at their own
/// suspension points and must not block indefinitely.
#[derive(Clone)]
pub struct AgentContext {
    pub cancel: CancellationToken,
    pub llm: Option<Arc<dyn CompletionBackend>>,
    pub memory: Option<Arc<dyn SharedMemory>>,
}

impl AgentContext {
    pub fn detached() -> Self {
        Self {
            cancel: CancellationToken::new(),
            llm: None,
            memory: None,
        }
    }

    /// Child context sharing backends, with a token cancelled when the
    /// parent's is.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            llm: self.llm.clone(),
            memory: self.memory.clone(),
        }
    }
}

/// A task handler bound to an `AgentId` in the agent registry.
///
/// Handlers are expected to be idempotent for the same `(task id, inputs)`
/// pair; the engine may invoke them more than once on retry or resume.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(&self, task: AgentTask, ctx: AgentContext) -> CoreResult<AgentOutcome>;
}
