//! Plan DTOs: planner input, steps, and the assembled plan.
//!
//! Plans are flat tables of steps keyed by `StepId`; dependencies are id
//! sets, so the structure is acyclic by construction of the planner and
//! re-verified by the workflow engine before execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use super::agent::{AgentId, TagMap};

/// Identifier of a step, unique within its plan (`seq_1`, `seq_2`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn sequential(index: usize) -> Self {
        Self(format!("seq_{}", index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of work a step represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepType {
    Analysis,
    Design,
    Implementation,
    QualityAssurance,
    Governance,
    Review,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Design => "design",
            Self::Implementation => "implementation",
            Self::QualityAssurance => "quality-assurance",
            Self::Governance => "governance",
            Self::Review => "review",
        }
    }

    /// Optional steps may be dropped to satisfy a duration budget, in this
    /// order: governance first, then review.
    pub const fn is_optional(&self) -> bool {
        matches!(self, Self::Governance | Self::Review)
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Step complexity band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// One unit of plannable work assigned to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: StepId,
    pub step_type: StepType,
    pub agent: AgentId,
    pub description: String,
    /// Ids of steps that must be `completed` before this one becomes ready.
    pub dependencies: BTreeSet<StepId>,
    pub estimated_duration_mins: u32,
    pub complexity: Complexity,
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    #[serde(default)]
    pub risk: String,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

/// Project context hints supplied with a planning request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanContext {
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub existing_artifacts: Vec<String>,
    #[serde(default)]
    pub project_type: Option<String>,
}

/// Planning preferences. Quality wins when both speed and quality are set.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PlanPreferences {
    #[serde(default)]
    pub prioritize_speed: bool,
    #[serde(default)]
    pub prioritize_quality: bool,
    #[serde(default)]
    pub minimize_cost: bool,
}

/// Hard constraints on the produced plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanConstraints {
    /// Upper bound on the summed estimated duration, in minutes.
    #[serde(default)]
    pub max_duration_mins: Option<u32>,
    #[serde(default)]
    pub forbidden_agents: BTreeSet<AgentId>,
    /// When non-empty, every step's agent must be a member.
    #[serde(default)]
    pub allowed_agents: BTreeSet<AgentId>,
    #[serde(default)]
    pub required_agents: BTreeSet<AgentId>,
}

/// Input to `Planner::create_plan`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannerInput {
    /// Natural-language feature description. Must be non-empty.
    pub request: String,
    #[serde(default)]
    pub context: Option<PlanContext>,
    #[serde(default)]
    pub preferences: Option<PlanPreferences>,
    #[serde(default)]
    pub constraints: Option<PlanConstraints>,
    #[serde(default)]
    pub metadata: TagMap,
}

impl PlannerInput {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            ..Self::default()
        }
    }
}

/// Plan-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub created_at: DateTime<Utc>,
    /// Stable schema version of the persisted plan JSON.
    pub version: u32,
    pub priority: u8,
    pub tags: TagMap,
    pub estimated_duration_mins: u32,
    pub source: String,
    /// Set by the `minimize_cost` preference; downstream may prefer cheaper
    /// models when true.
    #[serde(default)]
    pub cost_sensitive: bool,
}

/// A dependency-ordered, acyclic plan answering one `PlannerInput`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    pub description: String,
    pub steps: Vec<PlanStep>,
    pub metadata: PlanMetadata,
}

impl Plan {
    /// Sum of all step duration estimates in minutes.
    pub fn total_duration_mins(&self) -> u32 {
        self.steps.iter().map(|s| s.estimated_duration_mins).sum()
    }

    /// Look up a step by id.
    pub fn step(&self, id: &StepId) -> Option<&PlanStep> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Validate structural invariants: unique step ids, every dependency
    /// resolves within the plan, and the graph is acyclic.
    pub fn validate_structure(&self) -> Result<(), String> {
        let mut ids = BTreeSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.clone()) {
                return Err(format!("duplicate step id {}", step.id));
            }
        }
        for step in &self.steps {
            for dep in &step.dependencies {
                if !ids.contains(dep) {
                    return Err(format!("step {} depends on unknown step {}", step.id, dep));
                }
            }
        }
        topological_order(&self.steps).map(|_| ()).ok_or_else(|| "dependency cycle".to_string())
    }
}

/// Kahn's algorithm over plan steps. Returns ids in a valid execution order,
/// or `None` when the graph has a cycle. Ready-set ties break by declaration
/// order.
pub fn topological_order(steps: &[PlanStep]) -> Option<Vec<StepId>> {
    let index_of: HashMap<&StepId, usize> =
        steps.iter().enumerate().map(|(i, s)| (&s.id, i)).collect();
    let mut in_degree: Vec<usize> = steps.iter().map(|s| s.dependencies.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

    for (i, step) in steps.iter().enumerate() {
        for dep in &step.dependencies {
            let dep_index = *index_of.get(dep)?;
            dependents[dep_index].push(i);
        }
    }

    let mut ready: Vec<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(steps.len());

    while !ready.is_empty() {
        ready.sort_unstable();
        let next = ready.remove(0);
        order.push(steps[next].id.clone());
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if order.len() == steps.len() {
        Some(order)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> PlanStep {
        PlanStep {
            id: StepId(id.to_string()),
            step_type: StepType::Implementation,
            agent: AgentId::Developer,
            description: String::new(),
            dependencies: deps.iter().map(|d| StepId((*d).to_string())).collect(),
            estimated_duration_mins: 10,
            complexity: Complexity::Medium,
            expected_outputs: Vec::new(),
            risk: String::new(),
            required_skills: Vec::new(),
            prerequisites: Vec::new(),
            success_criteria: Vec::new(),
        }
    }

    #[test]
    fn test_topological_order_linear_chain() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])];
        let order = topological_order(&steps).unwrap();
        assert_eq!(
            order,
            vec![
                StepId("a".into()),
                StepId("b".into()),
                StepId("c".into())
            ]
        );
    }

    #[test]
    fn test_topological_order_detects_cycle() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        assert!(topological_order(&steps).is_none());
    }

    #[test]
    fn test_topological_order_tie_breaks_by_declaration() {
        // Both b and c become ready after a; b is declared first.
        let steps = vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ];
        let order = topological_order(&steps).unwrap();
        assert_eq!(order[1], StepId("b".into()));
        assert_eq!(order[2], StepId("c".into()));
    }

    #[test]
    fn test_validate_structure_rejects_unknown_dependency() {
        let plan = Plan {
            plan_id: Uuid::new_v4(),
            description: "x".into(),
            steps: vec![step("a", &["missing"])],
            metadata: PlanMetadata {
                created_at: Utc::now(),
                version: 1,
                priority: 5,
                tags: TagMap::new(),
                estimated_duration_mins: 10,
                source: "test".into(),
                cost_sensitive: false,
            },
        };
        assert!(plan.validate_structure().is_err());
    }
}
