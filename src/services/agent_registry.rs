//! Agent registry: binds each `AgentId` to a task handler.
//!
//! Plans carry agent ids only; the workflow engine resolves an id to its
//! handler at dispatch time. Binding the same id again replaces the handler.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::models::AgentId;
use crate::domain::ports::AgentHandler;

#[derive(Default)]
pub struct AgentRegistry {
    handlers: RwLock<HashMap<AgentId, Arc<dyn AgentHandler>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bind(&self, agent: AgentId, handler: Arc<dyn AgentHandler>) {
        self.handlers.write().await.insert(agent, handler);
    }

    pub async fn resolve(&self, agent: &AgentId) -> Option<Arc<dyn AgentHandler>> {
        self.handlers.read().await.get(agent).map(Arc::clone)
    }

    pub async fn bound_agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.handlers.read().await.keys().cloned().collect();
        agents.sort();
        agents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::CoreResult;
    use crate::domain::models::{AgentOutcome, AgentTask};
    use crate::domain::ports::AgentContext;
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl AgentHandler for NoopHandler {
        async fn handle(&self, _task: AgentTask, _ctx: AgentContext) -> CoreResult<AgentOutcome> {
            Ok(AgentOutcome::ok(serde_json::Value::Null))
        }
    }

    #[tokio::test]
    async fn test_bind_and_resolve() {
        let registry = AgentRegistry::new();
        registry.bind(AgentId::Developer, Arc::new(NoopHandler)).await;

        assert!(registry.resolve(&AgentId::Developer).await.is_some());
        assert!(registry.resolve(&AgentId::Qa).await.is_none());
        assert_eq!(registry.bound_agents().await, vec![AgentId::Developer]);
    }

    #[tokio::test]
    async fn test_rebind_replaces() {
        let registry = AgentRegistry::new();
        registry.bind(AgentId::Qa, Arc::new(NoopHandler)).await;
        registry.bind(AgentId::Qa, Arc::new(NoopHandler)).await;
        assert_eq!(registry.bound_agents().await.len(), 1);
    }
}
