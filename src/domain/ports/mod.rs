//! Domain ports (interfaces) for the Maestro orchestrator core.

pub mod agent;
pub mod checkpoint_store;
pub mod memory_store;
pub mod plan_archive;
pub mod provider;

pub use agent::{AgentContext, AgentHandler, CompletionBackend, SharedMemory};
pub use checkpoint_store::CheckpointStore;
pub use memory_store::MemoryStore;
pub use plan_archive::PlanArchive;
pub use provider::ProviderAdapter;
