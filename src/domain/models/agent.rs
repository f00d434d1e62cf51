//! Agent identities and the task/outcome shapes exchanged with handlers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::plan::PlanStep;

/// A named agent role. Plans carry `AgentId` values; the workflow engine
/// resolves each id to a registered handler at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AgentId {
    Planner,
    Developer,
    Qa,
    Docs,
    Brain,
    Custom(String),
}

impl AgentId {
    /// Stable string form used in storage and event payloads.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Planner => "planner",
            Self::Developer => "developer",
            Self::Qa => "qa",
            Self::Docs => "docs",
            Self::Brain => "brain",
            Self::Custom(name) => name,
        }
    }

    /// Parse from the stable string form. Unknown names become `Custom`.
    pub fn parse(s: &str) -> Self {
        match s {
            "planner" => Self::Planner,
            "developer" => Self::Developer,
            "qa" => Self::Qa,
            "docs" => Self::Docs,
            "brain" => Self::Brain,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for AgentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AgentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// One unit of work handed to an agent handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub workflow_id: Uuid,
    pub plan_id: Uuid,
    pub step: PlanStep,
    /// 1-based attempt counter; handlers are expected to be idempotent for
    /// the same `(step.id, inputs)` pair.
    pub attempt: u32,
}

/// Result returned by an agent handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub success: bool,
    /// Structured output for dependents (stored in the task state).
    pub output: serde_json::Value,
    /// Paths or identifiers of artifacts the agent produced.
    pub artifacts: Vec<String>,
    /// Records the engine persists to shared memory on the agent's behalf.
    pub memory_updates: Vec<MemoryWrite>,
    /// Failure detail when `success` is false.
    pub error: Option<String>,
}

impl AgentOutcome {
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// A memory write requested through an agent outcome. The engine stores it
/// with the executing agent as origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryWrite {
    pub key: String,
    pub category: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Free-form tag map reused by plan and record metadata.
pub type TagMap = BTreeMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_round_trip() {
        for agent in [
            AgentId::Planner,
            AgentId::Developer,
            AgentId::Qa,
            AgentId::Docs,
            AgentId::Brain,
            AgentId::Custom("reviewer".into()),
        ] {
            assert_eq!(AgentId::parse(agent.as_str()), agent);
        }
    }

    #[test]
    fn test_agent_id_serde_uses_string_form() {
        let json = serde_json::to_string(&AgentId::Qa).unwrap();
        assert_eq!(json, "\"qa\"");

        let parsed: AgentId = serde_json::from_str("\"reviewer\"").unwrap();
        assert_eq!(parsed, AgentId::Custom("reviewer".into()));
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = AgentOutcome::ok(serde_json::json!({"files": 3}));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = AgentOutcome::failed("compile error");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("compile error"));
    }
}
