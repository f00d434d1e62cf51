//! Plan archive port - persistence for produced plan DTOs.

use async_trait::async_trait;

use crate::domain::errors::CoreResult;
use crate::domain::models::Plan;

/// Persists plans as they are created. Archive failures are logged by the
/// planner and never fail plan creation.
#[async_trait]
pub trait PlanArchive: Send + Sync {
    async fn store_plan(&self, plan: &Plan) -> CoreResult<()>;
}
