//! Shared helpers for the integration suites: scripted agents, fast runner
//! options, and service wiring.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use maestro::domain::errors::{CoreError, CoreResult};
use maestro::domain::models::{
    AgentId, AgentOutcome, AgentTask, Complexity, ExecuteOptions, Plan, PlanMetadata, PlanStep,
    StepId, StepType, TagMap,
};
use maestro::domain::ports::{AgentContext, AgentHandler};
use maestro::services::{AgentRegistry, EventBus, ExecutionQueue, Planner};

/// Runner options with millisecond backoffs so retry tests stay fast.
pub fn fast_options() -> ExecuteOptions {
    ExecuteOptions {
        backoff_base_ms: 10,
        backoff_cap_ms: 50,
        ..ExecuteOptions::default()
    }
}

/// Agent that always succeeds and records the order steps were handled in.
#[derive(Default)]
pub struct RecordingAgent {
    pub calls: Mutex<Vec<StepId>>,
}

impl RecordingAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn handled(&self) -> Vec<StepId> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl AgentHandler for RecordingAgent {
    async fn handle(&self, task: AgentTask, _ctx: AgentContext) -> CoreResult<AgentOutcome> {
        self.calls.lock().await.push(task.step.id.clone());
        Ok(AgentOutcome::ok(serde_json::json!({"step": task.step.id})))
    }
}

/// Agent that fails the first `n` invocations of configured steps, then
/// succeeds. Unconfigured steps always succeed.
pub struct FlakyAgent {
    remaining_failures: Mutex<HashMap<StepId, u32>>,
    pub calls: Mutex<Vec<StepId>>,
}

impl FlakyAgent {
    pub fn new(failures: &[(&str, u32)]) -> Arc<Self> {
        Arc::new(Self {
            remaining_failures: Mutex::new(
                failures
                    .iter()
                    .map(|(id, n)| (StepId((*id).to_string()), *n))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub async fn handled(&self) -> Vec<StepId> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl AgentHandler for FlakyAgent {
    async fn handle(&self, task: AgentTask, _ctx: AgentContext) -> CoreResult<AgentOutcome> {
        self.calls.lock().await.push(task.step.id.clone());
        let mut remaining = self.remaining_failures.lock().await;
        if let Some(count) = remaining.get_mut(&task.step.id) {
            if *count > 0 {
                *count -= 1;
                return Err(CoreError::AgentFailure {
                    agent: task.step.agent.to_string(),
                    message: "scripted failure".to_string(),
                });
            }
        }
        Ok(AgentOutcome::ok(serde_json::json!({"step": task.step.id})))
    }
}

/// Agent that blocks until its context is cancelled.
pub struct BlockingAgent;

#[async_trait]
impl AgentHandler for BlockingAgent {
    async fn handle(&self, _task: AgentTask, ctx: AgentContext) -> CoreResult<AgentOutcome> {
        tokio::select! {
            () = ctx.cancel.cancelled() => Err(CoreError::Cancelled),
            () = tokio::time::sleep(std::time::Duration::from_secs(30)) => {
                Ok(AgentOutcome::ok(serde_json::Value::Null))
            }
        }
    }
}

/// Bind one handler to every built-in agent role.
pub async fn bind_all(registry: &AgentRegistry, handler: Arc<dyn AgentHandler>) {
    for agent in [
        AgentId::Planner,
        AgentId::Developer,
        AgentId::Qa,
        AgentId::Docs,
        AgentId::Brain,
    ] {
        registry.bind(agent, handler.clone()).await;
    }
}

/// A linear plan of `n` developer steps: seq_1 <- seq_2 <- ... <- seq_n.
pub fn linear_plan(n: usize) -> Plan {
    let steps = (1..=n)
        .map(|i| PlanStep {
            id: StepId::sequential(i),
            step_type: StepType::Implementation,
            agent: AgentId::Developer,
            description: format!("step {i}"),
            dependencies: if i > 1 {
                std::iter::once(StepId::sequential(i - 1)).collect()
            } else {
                Default::default()
            },
            estimated_duration_mins: 10,
            complexity: Complexity::Medium,
            expected_outputs: Vec::new(),
            risk: String::new(),
            required_skills: Vec::new(),
            prerequisites: Vec::new(),
            success_criteria: Vec::new(),
        })
        .collect();
    plan_with_steps(steps)
}

/// A diamond plan: seq_1 fans out to seq_2 and seq_3, which join at seq_4.
pub fn diamond_plan() -> Plan {
    let mut steps = linear_plan(4).steps;
    steps[2].dependencies = std::iter::once(StepId::sequential(1)).collect();
    steps[3].dependencies = [StepId::sequential(2), StepId::sequential(3)]
        .into_iter()
        .collect();
    plan_with_steps(steps)
}

pub fn plan_with_steps(steps: Vec<PlanStep>) -> Plan {
    let total = steps.iter().map(|s| s.estimated_duration_mins).sum();
    Plan {
        plan_id: uuid::Uuid::new_v4(),
        description: "test plan".to_string(),
        steps,
        metadata: PlanMetadata {
            created_at: chrono::Utc::now(),
            version: 1,
            priority: 5,
            tags: TagMap::new(),
            estimated_duration_mins: total,
            source: "test".to_string(),
            cost_sensitive: false,
        },
    }
}

/// Planner wired to a fresh bus and queue.
pub fn planner_fixture() -> (Planner, Arc<EventBus>, Arc<ExecutionQueue>) {
    let bus = Arc::new(EventBus::default());
    let queue = Arc::new(ExecutionQueue::new(bus.clone()));
    (Planner::new(bus.clone(), queue.clone()), bus, queue)
}
