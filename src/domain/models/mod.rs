//! Domain models
//!
//! Pure domain entities with business logic and validation rules. These
//! models are framework-agnostic and contain no infrastructure concerns.

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod memory;
pub mod plan;
pub mod provider;
pub mod workflow;

pub use agent::{AgentId, AgentOutcome, AgentTask, MemoryWrite, TagMap};
pub use checkpoint::{TaskState, TaskStatus, WorkflowCheckpoint, CHECKPOINT_SCHEMA_VERSION};
pub use config::{BreakerSettings, CoreConfig, RateLimitSettings};
pub use memory::{
    cosine_similarity, MemoryPermission, MemoryRecord, PermissionFlags, RecordMetadata,
    RecordPatch, SearchQuery,
};
pub use plan::{
    topological_order, Complexity, Plan, PlanConstraints, PlanContext, PlanMetadata,
    PlanPreferences, PlanStep, PlannerInput, StepId, StepType,
};
pub use provider::{
    ChatMessage, ChatRole, FinishReason, LlmRequest, LlmResponse, ProviderConfig, ProviderKind,
    ProviderSettings, ProviderStatus, TokenUsage,
};
pub use workflow::{ExecuteOptions, ExecutionMode, WorkflowResult, WorkflowStatus};
