//! Checkpoint store port - durable snapshot persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::CoreResult;
use crate::domain::models::WorkflowCheckpoint;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> CoreResult<()>;

    async fn load(
        &self,
        workflow_id: Uuid,
        checkpoint_id: Uuid,
    ) -> CoreResult<Option<WorkflowCheckpoint>>;

    /// Most recent checkpoint for a workflow, by creation time.
    async fn latest(&self, workflow_id: Uuid) -> CoreResult<Option<WorkflowCheckpoint>>;

    /// Checkpoint ids for a workflow, oldest first. Retention is the
    /// operator's concern; the store only appends.
    async fn list(&self, workflow_id: Uuid) -> CoreResult<Vec<Uuid>>;
}
