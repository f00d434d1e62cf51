//! Rule-based planner core.
//!
//! `create_plan` deterministically turns a `PlannerInput` into a `Plan`:
//! a canonical step sequence shaped by preferences and constraints. The only
//! side effects are the `plan.created` event, the enqueue, and best-effort
//! archival of the plan JSON. Failures never emit or enqueue.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    AgentId, Complexity, Plan, PlanConstraints, PlanMetadata, PlanPreferences, PlanStep,
    PlannerInput, StepId, StepType,
};
use crate::domain::ports::PlanArchive;
use crate::services::event_bus::{EventBus, EventPayload};
use crate::services::execution_queue::ExecutionQueue;

const COMPONENT: &str = "planner";

/// Stable schema version of persisted plan JSON.
pub const PLAN_SCHEMA_VERSION: u32 = 1;

/// Default plan priority (middle of the 0-10 band).
const DEFAULT_PRIORITY: u8 = 5;

/// A step under construction, before ids and dependencies are assigned.
#[derive(Debug, Clone)]
struct DraftStep {
    step_type: StepType,
    agent: AgentId,
    duration_mins: u32,
    complexity: Complexity,
    description: String,
    expected_outputs: Vec<String>,
    risk: String,
    required_skills: Vec<String>,
    success_criteria: Vec<String>,
}

pub struct Planner {
    bus: Arc<EventBus>,
    queue: Arc<ExecutionQueue>,
    archive: Option<Arc<dyn PlanArchive>>,
}

impl Planner {
    pub fn new(bus: Arc<EventBus>, queue: Arc<ExecutionQueue>) -> Self {
        Self {
            bus,
            queue,
            archive: None,
        }
    }

    /// Attach a plan archive; stored plans land under the archive's output
    /// directory as JSON.
    pub fn with_archive(mut self, archive: Arc<dyn PlanArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Build a plan for the given input, emit `plan.created`, and enqueue an
    /// owned copy. Fails with `InvalidInput` or `Infeasible`; failures emit
    /// nothing.
    pub async fn create_plan(&self, input: &PlannerInput) -> CoreResult<Plan> {
        let request = input.request.trim();
        if request.is_empty() {
            return Err(CoreError::InvalidInput(
                "request must be non-empty".to_string(),
            ));
        }

        let constraints = input.constraints.clone().unwrap_or_default();
        let conflicting: Vec<String> = constraints
            .forbidden_agents
            .intersection(&constraints.allowed_agents)
            .map(ToString::to_string)
            .collect();
        if !conflicting.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "agents both forbidden and allowed: {}",
                conflicting.join(", ")
            )));
        }

        let preferences = input.preferences.unwrap_or_default();

        let mut drafts = canonical_sequence(request);
        apply_preferences(&mut drafts, preferences, request);

        for draft in &mut drafts {
            draft.agent = resolve_agent(&draft.agent, &constraints)?;
        }

        if let Some(max) = constraints.max_duration_mins {
            shrink_to_budget(&mut drafts, max)?;
        }

        for required in &constraints.required_agents {
            if !drafts.iter().any(|d| &d.agent == required) {
                return Err(CoreError::Infeasible(format!(
                    "required agent '{required}' has no step in the plan"
                )));
            }
        }

        let steps = assemble_steps(drafts);
        let total: u32 = steps.iter().map(|s| s.estimated_duration_mins).sum();

        let plan = Plan {
            plan_id: Uuid::new_v4(),
            description: request.to_string(),
            steps,
            metadata: PlanMetadata {
                created_at: chrono::Utc::now(),
                version: PLAN_SCHEMA_VERSION,
                priority: DEFAULT_PRIORITY,
                tags: input.metadata.clone(),
                estimated_duration_mins: total,
                source: COMPONENT.to_string(),
                cost_sensitive: preferences.minimize_cost,
            },
        };

        if let Some(ref archive) = self.archive {
            if let Err(error) = archive.store_plan(&plan).await {
                tracing::warn!(plan_id = %plan.plan_id, %error, "failed to archive plan");
            }
        }

        self.bus.publish(
            COMPONENT,
            EventPayload::PlanCreated {
                plan_id: plan.plan_id,
                step_count: plan.steps.len(),
                estimated_duration_mins: total,
            },
        );
        self.queue.enqueue(plan.clone()).await;

        tracing::info!(
            plan_id = %plan.plan_id,
            steps = plan.steps.len(),
            duration_mins = total,
            "plan created"
        );
        Ok(plan)
    }
}

/// The canonical step sequence, in fixed order with default agents and
/// duration estimates.
fn canonical_sequence(request: &str) -> Vec<DraftStep> {
    vec![
        DraftStep {
            step_type: StepType::Analysis,
            agent: AgentId::Planner,
            duration_mins: 30,
            complexity: Complexity::Medium,
            description: format!("Analyze requirements and impacted components for: {request}"),
            expected_outputs: vec!["requirements summary".into(), "impact assessment".into()],
            risk: "requirements may be incomplete".into(),
            required_skills: vec!["requirements-analysis".into()],
            success_criteria: vec!["all impacted modules identified".into()],
        },
        DraftStep {
            step_type: StepType::Design,
            agent: AgentId::Planner,
            duration_mins: 45,
            complexity: Complexity::Medium,
            description: format!("Design the technical approach for: {request}"),
            expected_outputs: vec!["design document".into(), "interface sketch".into()],
            risk: "design may not cover all edge cases".into(),
            required_skills: vec!["system-design".into()],
            success_criteria: vec!["design reviewed against requirements".into()],
        },
        DraftStep {
            step_type: StepType::Implementation,
            agent: AgentId::Developer,
            duration_mins: 120,
            complexity: Complexity::High,
            description: format!("Implement: {request}"),
            expected_outputs: vec!["source changes".into(), "unit tests".into()],
            risk: "implementation may regress existing behavior".into(),
            required_skills: vec!["coding".into(), "testing".into()],
            success_criteria: vec!["tests pass".into(), "feature behaves as designed".into()],
        },
        DraftStep {
            step_type: StepType::QualityAssurance,
            agent: AgentId::Qa,
            duration_mins: 60,
            complexity: Complexity::Medium,
            description: format!("Verify and exercise the implementation of: {request}"),
            expected_outputs: vec!["test report".into()],
            risk: "coverage gaps may hide defects".into(),
            required_skills: vec!["test-design".into()],
            success_criteria: vec!["no open critical defects".into()],
        },
        DraftStep {
            step_type: StepType::Governance,
            agent: AgentId::Docs,
            duration_mins: 30,
            complexity: Complexity::Low,
            description: format!("Document and record decisions for: {request}"),
            expected_outputs: vec!["changelog entry".into(), "decision record".into()],
            risk: "documentation may drift from implementation".into(),
            required_skills: vec!["technical-writing".into()],
            success_criteria: vec!["docs merged alongside the change".into()],
        },
    ]
}

fn review_step(request: &str) -> DraftStep {
    DraftStep {
        step_type: StepType::Review,
        agent: AgentId::Docs,
        duration_mins: 45,
        complexity: Complexity::Low,
        description: format!("Final review pass over the delivered work for: {request}"),
        expected_outputs: vec!["review notes".into()],
        risk: "review findings may require rework".into(),
        required_skills: vec!["code-review".into()],
        success_criteria: vec!["reviewer sign-off".into()],
    }
}

/// Apply preferences. Quality wins over speed when both are set: the 1.25
/// factor applies and the review step is appended.
fn apply_preferences(drafts: &mut Vec<DraftStep>, preferences: PlanPreferences, request: &str) {
    if preferences.prioritize_quality {
        drafts.push(review_step(request));
        scale_durations(drafts, 1.25);
    } else if preferences.prioritize_speed {
        scale_durations(drafts, 0.75);
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale_durations(drafts: &mut [DraftStep], factor: f64) {
    for draft in drafts {
        let scaled = (f64::from(draft.duration_mins) * factor).ceil();
        draft.duration_mins = scaled.max(1.0) as u32;
    }
}

/// Fixed substitution table used when an agent is excluded by constraints.
fn substitute(agent: &AgentId) -> Option<AgentId> {
    match agent {
        AgentId::Planner | AgentId::Developer => Some(AgentId::Brain),
        AgentId::Qa => Some(AgentId::Developer),
        AgentId::Docs => Some(AgentId::Developer),
        AgentId::Brain | AgentId::Custom(_) => None,
    }
}

fn permitted(agent: &AgentId, constraints: &PlanConstraints) -> bool {
    !constraints.forbidden_agents.contains(agent)
        && (constraints.allowed_agents.is_empty() || constraints.allowed_agents.contains(agent))
}

/// Keep the agent when permitted, otherwise remap through the substitution
/// table. No permitted substitute means the plan is infeasible.
fn resolve_agent(agent: &AgentId, constraints: &PlanConstraints) -> CoreResult<AgentId> {
    if permitted(agent, constraints) {
        return Ok(agent.clone());
    }
    match substitute(agent) {
        Some(fallback) if permitted(&fallback, constraints) => Ok(fallback),
        _ => Err(CoreError::Infeasible(format!(
            "no permitted agent available for role '{agent}'"
        ))),
    }
}

/// Drop optional steps (governance first, then review) until the duration
/// budget is met.
fn shrink_to_budget(drafts: &mut Vec<DraftStep>, max_duration_mins: u32) -> CoreResult<()> {
    loop {
        let total: u32 = drafts.iter().map(|d| d.duration_mins).sum();
        if total <= max_duration_mins {
            return Ok(());
        }
        let droppable = drafts
            .iter()
            .rposition(|d| d.step_type == StepType::Governance)
            .or_else(|| drafts.iter().rposition(|d| d.step_type == StepType::Review));
        match droppable {
            Some(index) => {
                let dropped = drafts.remove(index);
                tracing::debug!(step = %dropped.step_type, "dropped optional step for duration budget");
            }
            None => {
                return Err(CoreError::Infeasible(format!(
                    "mandatory steps need {total} minutes but the budget is {max_duration_mins}"
                )));
            }
        }
    }
}

/// Assign sequential ids and chain each step onto its predecessor. Removed
/// steps collapse transitively because the chain is rebuilt over the final
/// sequence. A review step anchors on the quality-assurance step instead of
/// its predecessor.
fn assemble_steps(drafts: Vec<DraftStep>) -> Vec<PlanStep> {
    let qa_index = drafts
        .iter()
        .position(|d| d.step_type == StepType::QualityAssurance);
    let mut steps = Vec::with_capacity(drafts.len());
    let mut previous: Option<StepId> = None;
    for (index, draft) in drafts.into_iter().enumerate() {
        let id = StepId::sequential(index + 1);
        let anchor = match (draft.step_type, qa_index) {
            (StepType::Review, Some(qa)) if qa < index => Some(StepId::sequential(qa + 1)),
            _ => previous.clone(),
        };
        let dependencies = anchor.into_iter().collect();
        previous = Some(id.clone());
        steps.push(PlanStep {
            id,
            step_type: draft.step_type,
            agent: draft.agent,
            description: draft.description,
            dependencies,
            estimated_duration_mins: draft.duration_mins,
            complexity: draft.complexity,
            expected_outputs: draft.expected_outputs,
            risk: draft.risk,
            required_skills: draft.required_skills,
            prerequisites: Vec::new(),
            success_criteria: draft.success_criteria,
        });
    }
    steps
}
