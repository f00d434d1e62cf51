//! Workflow checkpoints: durable snapshots sufficient to resume execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::plan::StepId;
use super::workflow::ExecuteOptions;

/// Persisted checkpoint schema version. Bump on incompatible layout changes.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Runtime status of one task (the execution shadow of a plan step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mutable runtime state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub status: TaskStatus,
    /// Number of failed attempts so far.
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl TaskState {
    pub fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
            started_at: None,
            completed_at: None,
            result: None,
        }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::pending()
    }
}

/// A durable snapshot of workflow state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub schema_version: u32,
    pub checkpoint_id: Uuid,
    pub workflow_id: Uuid,
    pub plan_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub task_states: BTreeMap<StepId, TaskState>,
    /// Steps that were ready at snapshot time.
    pub next_ready: Vec<StepId>,
    /// Runner options snapshot for deterministic resume.
    pub runner_config: ExecuteOptions,
}

impl WorkflowCheckpoint {
    pub fn new(
        workflow_id: Uuid,
        plan_id: Uuid,
        task_states: BTreeMap<StepId, TaskState>,
        next_ready: Vec<StepId>,
        runner_config: ExecuteOptions,
    ) -> Self {
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            checkpoint_id: Uuid::new_v4(),
            workflow_id,
            plan_id,
            created_at: Utc::now(),
            task_states,
            next_ready,
            runner_config,
        }
    }
}
