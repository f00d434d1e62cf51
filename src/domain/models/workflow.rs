//! Workflow execution options and results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plan::StepId;

/// How ready tasks are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ExecutionMode {
    /// One task at a time, in dependency order.
    Sequential,
    /// Up to `parallelism` sibling tasks at once.
    Parallel { parallelism: usize },
}

impl ExecutionMode {
    pub const fn dispatch_limit(&self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Parallel { parallelism } => *parallelism,
        }
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Sequential
    }
}

/// Options accepted by `WorkflowEngine::execute`. Serialized into every
/// checkpoint as the runner config so a resume is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteOptions {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Retries allowed per task beyond the first attempt.
    pub max_retries: u32,
    /// Whole-workflow deadline.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Per-task deadline for one agent invocation.
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,
    /// Keep executing independent branches after a permanent task failure.
    #[serde(default)]
    pub continue_on_failure: bool,
    /// Minimum interval between non-final checkpoints.
    #[serde(default)]
    pub checkpoint_interval_ms: Option<u64>,
    /// Base for the retry backoff `min(base * 2^(attempts-1), cap)`.
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            max_retries: 3,
            timeout_ms: None,
            task_timeout_ms: None,
            continue_on_failure: false,
            checkpoint_interval_ms: None,
            backoff_base_ms: 5_000,
            backoff_cap_ms: 60_000,
        }
    }
}

impl ExecuteOptions {
    /// Retry delay for a task that has failed `attempts` times.
    pub fn backoff_delay_ms(&self, attempts: u32) -> u64 {
        let exponent = attempts.saturating_sub(1).min(32);
        self.backoff_base_ms
            .saturating_mul(2_u64.saturating_pow(exponent))
            .min(self.backoff_cap_ms)
    }
}

/// Terminal disposition of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Every task completed.
    Completed,
    /// Some tasks completed, some failed or were skipped.
    Partial,
    /// No task completed.
    Failed,
    Cancelled,
    TimedOut,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate outcome of `WorkflowEngine::execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: Uuid,
    pub plan_id: Uuid,
    pub status: WorkflowStatus,
    pub completed_tasks: Vec<StepId>,
    pub failed_tasks: Vec<StepId>,
    pub skipped_tasks: Vec<StepId>,
    pub duration_ms: u64,
    /// Number of checkpoints written during the run.
    pub checkpoints_written: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let options = ExecuteOptions::default();
        assert_eq!(options.backoff_delay_ms(1), 5_000);
        assert_eq!(options.backoff_delay_ms(2), 10_000);
        assert_eq!(options.backoff_delay_ms(3), 20_000);
        assert_eq!(options.backoff_delay_ms(4), 40_000);
        // Capped at 60s from the fifth failure on.
        assert_eq!(options.backoff_delay_ms(5), 60_000);
        assert_eq!(options.backoff_delay_ms(10), 60_000);
    }

    #[test]
    fn test_dispatch_limit() {
        assert_eq!(ExecutionMode::Sequential.dispatch_limit(), 1);
        assert_eq!(ExecutionMode::Parallel { parallelism: 4 }.dispatch_limit(), 4);
    }
}
