//! Dependency-resolving task scheduler with retries, checkpointing, and
//! resumability.
//!
//! The engine is a single coordinator: it sees one event at a time. Ready
//! tasks are dispatched onto a `JoinSet` (one at a time in sequential mode,
//! up to the parallelism limit otherwise) and retry backoffs live on a
//! delayed list, promoted back to ready by a timer tick. Cancellation is
//! cooperative and propagates to every agent context; a workflow deadline
//! is internally a cancellation plus a `TimedOut` status.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    AgentOutcome, AgentTask, ExecuteOptions, MemoryRecord, Plan, PlanStep, StepId, TaskState,
    TaskStatus, WorkflowCheckpoint, WorkflowResult, WorkflowStatus,
};
use crate::domain::ports::{AgentContext, CompletionBackend, SharedMemory};
use crate::services::agent_registry::AgentRegistry;
use crate::services::checkpoint_manager::CheckpointManager;
use crate::services::event_bus::{EventBus, EventPayload};

const COMPONENT: &str = "workflow-engine";

pub struct WorkflowEngine {
    agents: Arc<AgentRegistry>,
    bus: Arc<EventBus>,
    checkpoints: Option<Arc<CheckpointManager>>,
    llm: Option<Arc<dyn CompletionBackend>>,
    memory: Option<Arc<dyn SharedMemory>>,
}

impl WorkflowEngine {
    pub fn new(agents: Arc<AgentRegistry>, bus: Arc<EventBus>) -> Self {
        Self {
            agents,
            bus,
            checkpoints: None,
            llm: None,
            memory: None,
        }
    }

    pub fn with_checkpoints(mut self, manager: Arc<CheckpointManager>) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    pub fn with_completion_backend(mut self, llm: Arc<dyn CompletionBackend>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_shared_memory(mut self, memory: Arc<dyn SharedMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Execute a plan from scratch.
    pub async fn execute(
        &self,
        plan: &Plan,
        options: ExecuteOptions,
        cancel: CancellationToken,
    ) -> CoreResult<WorkflowResult> {
        validate_plan(plan)?;
        let states: BTreeMap<StepId, TaskState> = plan
            .steps
            .iter()
            .map(|s| (s.id.clone(), TaskState::pending()))
            .collect();
        self.run(Uuid::new_v4(), plan, states, options, cancel).await
    }

    /// Resume a workflow from a checkpoint. Completed tasks are never
    /// re-executed; previously running tasks restart with their attempt
    /// counters preserved; failed tasks keep honoring the retry budget.
    pub async fn resume(
        &self,
        plan: &Plan,
        checkpoint: &WorkflowCheckpoint,
        cancel: CancellationToken,
    ) -> CoreResult<WorkflowResult> {
        if checkpoint.plan_id != plan.plan_id {
            return Err(CoreError::InvalidInput(format!(
                "checkpoint {} belongs to plan {}, not {}",
                checkpoint.checkpoint_id, checkpoint.plan_id, plan.plan_id
            )));
        }
        validate_plan(plan)?;

        let options = checkpoint.runner_config.clone();
        let mut states: BTreeMap<StepId, TaskState> = BTreeMap::new();
        for step in &plan.steps {
            let mut state = checkpoint
                .task_states
                .get(&step.id)
                .cloned()
                .unwrap_or_else(TaskState::pending);
            match state.status {
                // A task interrupted mid-flight restarts; its attempts stand.
                TaskStatus::Running => {
                    state.status = TaskStatus::Ready;
                    state.started_at = None;
                }
                // A failed task that still has retry budget re-enters the
                // rotation; an exhausted one stays failed.
                TaskStatus::Failed if state.attempts <= options.max_retries => {
                    state.status = TaskStatus::Ready;
                }
                _ => {}
            }
            states.insert(step.id.clone(), state);
        }

        self.run(checkpoint.workflow_id, plan, states, options, cancel)
            .await
    }

    #[allow(clippy::too_many_lines)]
    async fn run(
        &self,
        workflow_id: Uuid,
        plan: &Plan,
        mut states: BTreeMap<StepId, TaskState>,
        options: ExecuteOptions,
        cancel: CancellationToken,
    ) -> CoreResult<WorkflowResult> {
        let started = Instant::now();
        let deadline = options
            .timeout_ms
            .map(|ms| started + Duration::from_millis(ms));
        let order: Vec<StepId> = plan.steps.iter().map(|s| s.id.clone()).collect();
        let steps: HashMap<StepId, PlanStep> = plan
            .steps
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();

        // Token governing this run: external cancellation and the workflow
        // deadline both funnel through it.
        let run_token = cancel.child_token();

        let mut delayed: Vec<(Instant, StepId)> = Vec::new();
        promote_ready(&order, &steps, &mut states, &delayed);

        self.bus.publish(
            COMPONENT,
            EventPayload::WorkflowStarted {
                workflow_id,
                plan_id: plan.plan_id,
                task_count: order.len(),
            },
        );

        let mut running: JoinSet<(StepId, CoreResult<AgentOutcome>)> = JoinSet::new();
        let mut running_count = 0usize;
        let limit = options.mode.dispatch_limit().max(1);
        let mut checkpoints_written = 0u32;
        let mut cancelled = false;
        let mut timed_out = false;

        loop {
            let now = Instant::now();
            let mut index = 0;
            while index < delayed.len() {
                if delayed[index].0 <= now {
                    let (_, id) = delayed.swap_remove(index);
                    if let Some(state) = states.get_mut(&id) {
                        state.status = TaskStatus::Ready;
                    }
                } else {
                    index += 1;
                }
            }

            while running_count < limit {
                let Some(next) = next_ready(&order, &states) else {
                    break;
                };
                self.dispatch(
                    workflow_id,
                    plan.plan_id,
                    &next,
                    &steps,
                    &mut states,
                    &options,
                    &run_token,
                    &mut running,
                )
                .await;
                running_count += 1;
            }

            if running_count == 0 && delayed.is_empty() && next_ready(&order, &states).is_none() {
                break;
            }

            let next_wake: Option<Instant> = {
                let delay_wake = delayed.iter().map(|(at, _)| *at).min();
                match (delay_wake, deadline) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (Some(a), None) => Some(a),
                    (None, b) => b,
                }
            };

            tokio::select! {
                biased;
                () = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                }
                joined = running.join_next(), if running_count > 0 => {
                    if let Some(join_result) = joined {
                        running_count -= 1;
                        match join_result {
                            Ok((id, result)) => {
                                self.handle_finished(
                                    workflow_id,
                                    plan,
                                    &order,
                                    &steps,
                                    &mut states,
                                    &mut delayed,
                                    &options,
                                    &mut checkpoints_written,
                                    id,
                                    result,
                                )
                                .await;
                            }
                            Err(join_error) => {
                                tracing::error!(%workflow_id, %join_error, "task join failed");
                            }
                        }
                    }
                }
                () = async {
                    match next_wake {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {}
            }

            if cancelled {
                run_token.cancel();
                self.drain(workflow_id, &mut states, &mut running).await;
                running_count = 0;
                break;
            }
            let work_remains = running_count > 0
                || !delayed.is_empty()
                || next_ready(&order, &states).is_some();
            if let Some(at) = deadline {
                if work_remains && Instant::now() >= at {
                    timed_out = true;
                    run_token.cancel();
                    self.drain(workflow_id, &mut states, &mut running).await;
                    running_count = 0;
                    break;
                }
            }
        }

        // Tasks that can never run (dependencies failed under
        // continue_on_failure, or the run was interrupted) end as skipped.
        for id in &order {
            if let Some(state) = states.get_mut(id) {
                if !state.status.is_terminal() {
                    state.status = TaskStatus::Skipped;
                }
            }
        }

        let final_checkpoint = WorkflowCheckpoint::new(
            workflow_id,
            plan.plan_id,
            states.clone(),
            Vec::new(),
            options.clone(),
        );
        if let Some(ref manager) = self.checkpoints {
            if manager.save(&final_checkpoint, None, true).await {
                checkpoints_written += 1;
            }
        }

        let result = build_result(
            workflow_id,
            plan.plan_id,
            &order,
            &states,
            started,
            checkpoints_written,
            cancelled,
            timed_out,
        );

        self.bus.publish(
            COMPONENT,
            EventPayload::WorkflowCompleted {
                workflow_id,
                status: result.status.to_string(),
                completed: result.completed_tasks.len(),
                failed: result.failed_tasks.len(),
                skipped: result.skipped_tasks.len(),
                duration_ms: result.duration_ms,
            },
        );
        if result.status == WorkflowStatus::Failed {
            self.bus.publish(
                COMPONENT,
                EventPayload::WorkflowFailed {
                    workflow_id,
                    error: "no task completed".to_string(),
                },
            );
        }

        tracing::info!(
            %workflow_id,
            status = %result.status,
            completed = result.completed_tasks.len(),
            failed = result.failed_tasks.len(),
            skipped = result.skipped_tasks.len(),
            "workflow finished"
        );
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        workflow_id: Uuid,
        plan_id: Uuid,
        id: &StepId,
        steps: &HashMap<StepId, PlanStep>,
        states: &mut BTreeMap<StepId, TaskState>,
        options: &ExecuteOptions,
        run_token: &CancellationToken,
        running: &mut JoinSet<(StepId, CoreResult<AgentOutcome>)>,
    ) {
        let step = steps[id].clone();
        let Some(state) = states.get_mut(id) else {
            return;
        };
        state.status = TaskStatus::Running;
        state.started_at = Some(chrono::Utc::now());
        let attempt = state.attempts + 1;

        self.bus.publish(
            COMPONENT,
            EventPayload::WorkflowTaskStarted {
                workflow_id,
                step_id: id.clone(),
                agent: step.agent.to_string(),
                attempt,
            },
        );

        let handler = self.agents.resolve(&step.agent).await;
        let ctx = AgentContext {
            cancel: run_token.child_token(),
            llm: self.llm.clone(),
            memory: self.memory.clone(),
        };
        let task = AgentTask {
            workflow_id,
            plan_id,
            step: step.clone(),
            attempt,
        };
        let task_timeout = options.task_timeout_ms;
        let task_id = id.clone();

        running.spawn(async move {
            let Some(handler) = handler else {
                let err = CoreError::AgentFailure {
                    agent: step.agent.to_string(),
                    message: "no handler bound for agent".to_string(),
                };
                return (task_id, Err(err));
            };

            let agent = step.agent.to_string();
            let invocation = async {
                match task_timeout {
                    Some(ms) => {
                        match tokio::time::timeout(Duration::from_millis(ms), handler.handle(task, ctx))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(CoreError::Timeout(ms)),
                        }
                    }
                    None => handler.handle(task, ctx).await,
                }
            };

            let result = match std::panic::AssertUnwindSafe(invocation).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(CoreError::AgentFailure {
                    agent,
                    message: "agent handler panicked".to_string(),
                }),
            };
            (task_id, result)
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_finished(
        &self,
        workflow_id: Uuid,
        plan: &Plan,
        order: &[StepId],
        steps: &HashMap<StepId, PlanStep>,
        states: &mut BTreeMap<StepId, TaskState>,
        delayed: &mut Vec<(Instant, StepId)>,
        options: &ExecuteOptions,
        checkpoints_written: &mut u32,
        id: StepId,
        result: CoreResult<AgentOutcome>,
    ) {
        let outcome = match result {
            Ok(outcome) if outcome.success => Some(outcome),
            Ok(outcome) => {
                let message = outcome
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string());
                self.record_failure(workflow_id, order, steps, states, delayed, options, &id, &message, true);
                None
            }
            Err(CoreError::Cancelled) => {
                self.record_failure(
                    workflow_id,
                    order,
                    steps,
                    states,
                    delayed,
                    options,
                    &id,
                    "Cancelled",
                    false,
                );
                None
            }
            Err(error @ CoreError::InvalidInput(_)) => {
                self.record_failure(
                    workflow_id,
                    order,
                    steps,
                    states,
                    delayed,
                    options,
                    &id,
                    &error.to_string(),
                    false,
                );
                None
            }
            Err(error) => {
                self.record_failure(
                    workflow_id,
                    order,
                    steps,
                    states,
                    delayed,
                    options,
                    &id,
                    &error.to_string(),
                    true,
                );
                None
            }
        };

        if let Some(outcome) = outcome {
            let attempts = match states.get_mut(&id) {
                Some(state) => {
                    state.status = TaskStatus::Completed;
                    state.completed_at = Some(chrono::Utc::now());
                    state.result = Some(outcome.output.clone());
                    state.attempts + 1
                }
                None => return,
            };
            self.bus.publish(
                COMPONENT,
                EventPayload::WorkflowTaskCompleted {
                    workflow_id,
                    step_id: id.clone(),
                    attempts,
                },
            );

            if let Some(ref memory) = self.memory {
                let agent = &steps[&id].agent;
                for write in outcome.memory_updates {
                    let record = MemoryRecord::new(write.key, write.category, write.data, agent.clone())
                        .with_tags(write.tags);
                    if let Err(error) = memory.put(record, agent).await {
                        tracing::warn!(%workflow_id, step = %id, %error, "memory update failed");
                    }
                }
            }

            promote_ready(order, steps, states, delayed);
        }

        self.checkpoint_progress(workflow_id, plan, states, options, checkpoints_written)
            .await;
    }

    /// Record a failure; retryable failures inside the budget go onto the
    /// delayed list with exponential backoff, everything else is terminal.
    #[allow(clippy::too_many_arguments)]
    fn record_failure(
        &self,
        workflow_id: Uuid,
        order: &[StepId],
        steps: &HashMap<StepId, PlanStep>,
        states: &mut BTreeMap<StepId, TaskState>,
        delayed: &mut Vec<(Instant, StepId)>,
        options: &ExecuteOptions,
        id: &StepId,
        message: &str,
        retryable: bool,
    ) {
        let Some(state) = states.get_mut(id) else {
            return;
        };
        state.attempts += 1;
        state.last_error = Some(message.to_string());
        let (attempts, permanent) = if retryable && state.attempts <= options.max_retries {
            state.status = TaskStatus::Pending;
            (state.attempts, false)
        } else {
            state.status = TaskStatus::Failed;
            state.completed_at = Some(chrono::Utc::now());
            (state.attempts, true)
        };

        if permanent {
            self.bus.publish(
                COMPONENT,
                EventPayload::WorkflowTaskFailed {
                    workflow_id,
                    step_id: id.clone(),
                    attempts,
                    error: message.to_string(),
                },
            );
            if !options.continue_on_failure {
                skip_dependents(order, steps, states, id);
            }
        } else {
            let delay = options.backoff_delay_ms(attempts);
            delayed.push((Instant::now() + Duration::from_millis(delay), id.clone()));
            self.bus.publish(
                COMPONENT,
                EventPayload::WorkflowTaskRetried {
                    workflow_id,
                    step_id: id.clone(),
                    attempt: attempts,
                    delay_ms: delay,
                },
            );
        }
    }

    async fn checkpoint_progress(
        &self,
        workflow_id: Uuid,
        plan: &Plan,
        states: &BTreeMap<StepId, TaskState>,
        options: &ExecuteOptions,
        checkpoints_written: &mut u32,
    ) {
        let Some(ref manager) = self.checkpoints else {
            return;
        };
        let next_ready: Vec<StepId> = states
            .iter()
            .filter(|(_, s)| s.status == TaskStatus::Ready)
            .map(|(id, _)| id.clone())
            .collect();
        let checkpoint = WorkflowCheckpoint::new(
            workflow_id,
            plan.plan_id,
            states.clone(),
            next_ready,
            options.clone(),
        );
        if manager
            .save(&checkpoint, options.checkpoint_interval_ms, false)
            .await
        {
            *checkpoints_written += 1;
        }
    }

    /// Collect in-flight tasks after cancellation or timeout. Tasks that
    /// finished before noticing the signal keep their real outcome; the rest
    /// fail with `Cancelled` and their dependents are skipped at loop exit.
    async fn drain(
        &self,
        workflow_id: Uuid,
        states: &mut BTreeMap<StepId, TaskState>,
        running: &mut JoinSet<(StepId, CoreResult<AgentOutcome>)>,
    ) {
        while let Some(join_result) = running.join_next().await {
            let Ok((id, result)) = join_result else {
                continue;
            };
            let Some(state) = states.get_mut(&id) else {
                continue;
            };
            match result {
                Ok(outcome) if outcome.success => {
                    state.status = TaskStatus::Completed;
                    state.completed_at = Some(chrono::Utc::now());
                    state.result = Some(outcome.output);
                    let attempts = state.attempts + 1;
                    self.bus.publish(
                        COMPONENT,
                        EventPayload::WorkflowTaskCompleted {
                            workflow_id,
                            step_id: id,
                            attempts,
                        },
                    );
                }
                _ => {
                    state.attempts += 1;
                    state.status = TaskStatus::Failed;
                    state.completed_at = Some(chrono::Utc::now());
                    state.last_error = Some("Cancelled".to_string());
                    let attempts = state.attempts;
                    self.bus.publish(
                        COMPONENT,
                        EventPayload::WorkflowTaskFailed {
                            workflow_id,
                            step_id: id,
                            attempts,
                            error: "Cancelled".to_string(),
                        },
                    );
                }
            }
        }
    }
}

/// Structural validation shared by execute and resume: every dependency must
/// resolve within the plan and the graph must be acyclic.
fn validate_plan(plan: &Plan) -> CoreResult<()> {
    let ids: BTreeSet<&StepId> = plan.steps.iter().map(|s| &s.id).collect();
    for step in &plan.steps {
        for dep in &step.dependencies {
            if !ids.contains(dep) {
                return Err(CoreError::InvalidInput(format!(
                    "step {} depends on unknown step {}",
                    step.id, dep
                )));
            }
        }
    }
    if crate::domain::models::topological_order(&plan.steps).is_none() {
        let culprit = plan
            .steps
            .first()
            .map_or_else(String::new, |s| s.id.to_string());
        return Err(CoreError::DependencyCycle(culprit));
    }
    Ok(())
}

/// Promote pending tasks whose dependencies have all completed, skipping
/// tasks sitting out a retry backoff.
fn promote_ready(
    order: &[StepId],
    steps: &HashMap<StepId, PlanStep>,
    states: &mut BTreeMap<StepId, TaskState>,
    delayed: &[(Instant, StepId)],
) {
    for id in order {
        let waiting = delayed.iter().any(|(_, d)| d == id);
        if waiting {
            continue;
        }
        let eligible = states.get(id).is_some_and(|s| s.status == TaskStatus::Pending)
            && steps[id].dependencies.iter().all(|dep| {
                states
                    .get(dep)
                    .is_some_and(|s| s.status == TaskStatus::Completed)
            });
        if eligible {
            if let Some(state) = states.get_mut(id) {
                state.status = TaskStatus::Ready;
            }
        }
    }
}

/// First ready task in declaration order.
fn next_ready(order: &[StepId], states: &BTreeMap<StepId, TaskState>) -> Option<StepId> {
    order
        .iter()
        .find(|id| states.get(id).is_some_and(|s| s.status == TaskStatus::Ready))
        .cloned()
}

/// Mark every transitive dependent of `failed` as skipped, leaving tasks
/// that already reached a terminal state untouched.
fn skip_dependents(
    order: &[StepId],
    steps: &HashMap<StepId, PlanStep>,
    states: &mut BTreeMap<StepId, TaskState>,
    failed: &StepId,
) {
    let mut blocked: BTreeSet<StepId> = BTreeSet::new();
    blocked.insert(failed.clone());
    // Declaration order is a topological order for planner output, but a
    // fixed point keeps this correct for arbitrary acyclic plans.
    loop {
        let mut changed = false;
        for id in order {
            if blocked.contains(id) {
                continue;
            }
            if steps[id].dependencies.iter().any(|dep| blocked.contains(dep)) {
                blocked.insert(id.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    blocked.remove(failed);
    for id in blocked {
        if let Some(state) = states.get_mut(&id) {
            if !state.status.is_terminal() && state.status != TaskStatus::Running {
                state.status = TaskStatus::Skipped;
            }
        }
    }
}

#[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
fn build_result(
    workflow_id: Uuid,
    plan_id: Uuid,
    order: &[StepId],
    states: &BTreeMap<StepId, TaskState>,
    started: Instant,
    checkpoints_written: u32,
    cancelled: bool,
    timed_out: bool,
) -> WorkflowResult {
    let mut completed = Vec::new();
    let mut failed = Vec::new();
    let mut skipped = Vec::new();
    for id in order {
        match states.get(id).map(|s| s.status) {
            Some(TaskStatus::Completed) => completed.push(id.clone()),
            Some(TaskStatus::Failed) => failed.push(id.clone()),
            Some(TaskStatus::Skipped) => skipped.push(id.clone()),
            _ => {}
        }
    }

    let status = if cancelled {
        WorkflowStatus::Cancelled
    } else if timed_out {
        WorkflowStatus::TimedOut
    } else if failed.is_empty() && skipped.is_empty() {
        WorkflowStatus::Completed
    } else if completed.is_empty() {
        WorkflowStatus::Failed
    } else {
        WorkflowStatus::Partial
    };

    WorkflowResult {
        workflow_id,
        plan_id,
        status,
        completed_tasks: completed,
        failed_tasks: failed,
        skipped_tasks: skipped,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        checkpoints_written,
    }
}
