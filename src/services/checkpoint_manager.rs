//! Checkpoint manager: serialize and restore workflow state.
//!
//! Writes are throttled by an optional minimum interval, except for final
//! checkpoints which always land. A failed write is retried once; a second
//! failure is logged and execution continues (checkpointing must never kill
//! a workflow).

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::WorkflowCheckpoint;
use crate::domain::ports::CheckpointStore;
use crate::services::event_bus::{EventBus, EventPayload};

const COMPONENT: &str = "checkpoint-manager";

pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    bus: Arc<EventBus>,
    last_write: Mutex<Option<Instant>>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            last_write: Mutex::new(None),
        }
    }

    /// Persist a checkpoint. When `interval_ms` is set and this is not a
    /// final checkpoint, writes within the interval are skipped. Returns
    /// whether a write happened.
    pub async fn save(
        &self,
        checkpoint: &WorkflowCheckpoint,
        interval_ms: Option<u64>,
        finalize: bool,
    ) -> bool {
        if !finalize {
            if let Some(interval) = interval_ms {
                let mut last = self.last_write.lock().await;
                let min_gap = Duration::from_millis(interval);
                if last.is_some_and(|at| at.elapsed() < min_gap) {
                    return false;
                }
                *last = Some(Instant::now());
            }
        }

        match self.write_with_retry(checkpoint).await {
            Ok(()) => {
                self.bus.publish(
                    COMPONENT,
                    EventPayload::WorkflowCheckpointSaved {
                        workflow_id: checkpoint.workflow_id,
                        checkpoint_id: checkpoint.checkpoint_id,
                    },
                );
                true
            }
            Err(error) => {
                tracing::error!(
                    workflow_id = %checkpoint.workflow_id,
                    %error,
                    "checkpoint write failed after retry"
                );
                false
            }
        }
    }

    async fn write_with_retry(&self, checkpoint: &WorkflowCheckpoint) -> CoreResult<()> {
        match self.store.save(checkpoint).await {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::warn!(
                    workflow_id = %checkpoint.workflow_id,
                    error = %first,
                    "checkpoint write failed, retrying once"
                );
                self.store
                    .save(checkpoint)
                    .await
                    .map_err(|second| CoreError::CheckpointWrite(second.to_string()))
            }
        }
    }

    pub async fn load(
        &self,
        workflow_id: Uuid,
        checkpoint_id: Uuid,
    ) -> CoreResult<WorkflowCheckpoint> {
        self.store
            .load(workflow_id, checkpoint_id)
            .await?
            .ok_or(CoreError::NotFound(checkpoint_id))
    }

    pub async fn latest(&self, workflow_id: Uuid) -> CoreResult<Option<WorkflowCheckpoint>> {
        self.store.latest(workflow_id).await
    }

    pub async fn list(&self, workflow_id: Uuid) -> CoreResult<Vec<Uuid>> {
        self.store.list(workflow_id).await
    }
}
