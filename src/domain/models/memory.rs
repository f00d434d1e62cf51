//! Shared agent memory: records, permissions, and search queries.
//!
//! Records are immutable in identity: `record_id`, `agent_origin`, and
//! `created_at` never change after insert. Updates overwrite only the
//! mutable fields (`data`, `metadata`, `embedding`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::AgentId;

/// Metadata attached to a memory record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub related_records: Vec<Uuid>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// One unit of shared agent memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub record_id: Uuid,
    /// Semantic name; not unique across records.
    pub key: String,
    /// Grouping label such as `solutions`, `patterns`, `decisions`.
    pub category: String,
    pub data: serde_json::Value,
    /// Creating agent. Immutable after insert.
    pub agent_origin: AgentId,
    /// Optional fixed-length embedding used for cosine similarity search.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: RecordMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Build a new record owned by `origin` with a fresh id and timestamps.
    pub fn new(
        key: impl Into<String>,
        category: impl Into<String>,
        data: serde_json::Value,
        origin: AgentId,
    ) -> Self {
        let now = Utc::now();
        Self {
            record_id: Uuid::new_v4(),
            key: key.into(),
            category: category.into(),
            data,
            agent_origin: origin,
            embedding: None,
            metadata: RecordMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.metadata.tags = tags;
        self
    }
}

/// Patch applied by `MemoryService::update`. Absent fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordPatch {
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<RecordMetadata>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Read/write/delete grant flags for one `(record, agent)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionFlags {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl PermissionFlags {
    /// Full access, granted to the creating agent at insert.
    pub const fn all() -> Self {
        Self {
            read: true,
            write: true,
            delete: true,
        }
    }

    pub const fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            delete: false,
        }
    }

    /// Whether `self` includes every flag set in `other`.
    pub const fn covers(&self, other: &Self) -> bool {
        (!other.read || self.read) && (!other.write || self.write) && (!other.delete || self.delete)
    }

    /// Union of two grants.
    pub const fn merge(&self, other: &Self) -> Self {
        Self {
            read: self.read || other.read,
            write: self.write || other.write,
            delete: self.delete || other.delete,
        }
    }

    pub const fn is_empty(&self) -> bool {
        !self.read && !self.write && !self.delete
    }
}

/// A persisted permission row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPermission {
    pub record_id: Uuid,
    pub agent_id: AgentId,
    pub flags: PermissionFlags,
}

/// Query accepted by `MemoryService::search_similar`.
#[derive(Debug, Clone)]
pub enum SearchQuery {
    /// Case-insensitive substring match on `key` and on the serialized
    /// `data`, ranked by match count.
    Text(String),
    /// Cosine similarity over records whose embedding length matches.
    Vector(Vec<f32>),
}

impl From<&str> for SearchQuery {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<f32>> for SearchQuery {
    fn from(v: Vec<f32>) -> Self {
        Self::Vector(v)
    }
}

/// Cosine similarity between two equal-length vectors. Zero-magnitude inputs
/// score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_covers() {
        let all = PermissionFlags::all();
        let read = PermissionFlags::read_only();
        assert!(all.covers(&read));
        assert!(all.covers(&all));
        assert!(!read.covers(&all));
        assert!(read.covers(&PermissionFlags::default()));
    }

    #[test]
    fn test_permission_merge() {
        let read = PermissionFlags::read_only();
        let write = PermissionFlags {
            write: true,
            ..PermissionFlags::default()
        };
        let merged = read.merge(&write);
        assert!(merged.read && merged.write && !merged.delete);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_record_builder() {
        let record = MemoryRecord::new(
            "jwt-auth",
            "solutions",
            serde_json::json!({"approach": "middleware"}),
            AgentId::Developer,
        )
        .with_embedding(vec![0.1, 0.2])
        .with_tags(vec!["auth".into()]);

        assert_eq!(record.agent_origin, AgentId::Developer);
        assert_eq!(record.embedding.as_ref().map(Vec::len), Some(2));
        assert_eq!(record.metadata.tags, vec!["auth".to_string()]);
    }
}
