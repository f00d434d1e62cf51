//! Memory service: permission-gated access to the shared record store plus
//! the semantic-search surface.
//!
//! The service owns policy: permission checks, immutable-field protection,
//! ranking, and event emission. Persistence mechanics live behind the
//! `MemoryStore` port.

use std::cmp::Ordering;
use std::sync::Arc;
use uuid::Uuid;

use async_trait::async_trait;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    cosine_similarity, AgentId, MemoryRecord, PermissionFlags, RecordPatch, SearchQuery,
};
use crate::domain::ports::{MemoryStore, SharedMemory};
use crate::services::event_bus::{EventBus, EventPayload};

const COMPONENT: &str = "memory";

/// Default result count for `search_similar`.
pub const DEFAULT_SEARCH_K: usize = 10;

pub struct MemoryService {
    store: Arc<dyn MemoryStore>,
    bus: Arc<EventBus>,
}

impl MemoryService {
    pub fn new(store: Arc<dyn MemoryStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Insert a record owned by `owner`. The owner's read/write/delete
    /// grant is written in the same transaction as the record.
    pub async fn put(&self, mut record: MemoryRecord, owner: &AgentId) -> CoreResult<Uuid> {
        if record.key.trim().is_empty() {
            return Err(CoreError::InvalidInput("record key must be non-empty".into()));
        }
        if record.category.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "record category must be non-empty".into(),
            ));
        }
        if record.record_id.is_nil() {
            record.record_id = Uuid::new_v4();
        }
        record.agent_origin = owner.clone();

        self.store.insert_record(&record).await?;
        self.bus.publish(
            COMPONENT,
            EventPayload::MemoryStored {
                record_id: record.record_id,
                key: record.key.clone(),
                category: record.category.clone(),
                agent: owner.to_string(),
            },
        );
        Ok(record.record_id)
    }

    /// Fetch a record. Requires `read` permission.
    pub async fn get(&self, id: Uuid, agent: &AgentId) -> CoreResult<MemoryRecord> {
        let record = self
            .store
            .fetch_record(id)
            .await?
            .ok_or(CoreError::NotFound(id))?;
        self.require(id, agent, "read").await?;
        Ok(record)
    }

    /// Read-modify-write of the mutable fields. Requires `write` permission.
    /// `record_id`, `agent_origin`, and `created_at` are immutable.
    pub async fn update(&self, id: Uuid, patch: RecordPatch, agent: &AgentId) -> CoreResult<()> {
        let mut record = self
            .store
            .fetch_record(id)
            .await?
            .ok_or(CoreError::NotFound(id))?;
        self.require(id, agent, "write").await?;

        if let Some(data) = patch.data {
            record.data = data;
        }
        if let Some(metadata) = patch.metadata {
            record.metadata = metadata;
        }
        if let Some(embedding) = patch.embedding {
            record.embedding = Some(embedding);
        }
        record.updated_at = chrono::Utc::now();

        self.store.update_record(&record).await?;
        self.bus.publish(
            COMPONENT,
            EventPayload::MemoryUpdated {
                record_id: id,
                agent: agent.to_string(),
            },
        );
        Ok(())
    }

    /// Delete a record and cascade its permission rows. Requires `delete`
    /// permission.
    pub async fn delete(&self, id: Uuid, agent: &AgentId) -> CoreResult<()> {
        self.store
            .fetch_record(id)
            .await?
            .ok_or(CoreError::NotFound(id))?;
        self.require(id, agent, "delete").await?;

        self.store.delete_record(id).await?;
        self.bus.publish(
            COMPONENT,
            EventPayload::MemoryDeleted {
                record_id: id,
                agent: agent.to_string(),
            },
        );
        Ok(())
    }

    /// Grant `flags` on a record to `target`. The grantor must hold every
    /// flag being granted; the record's origin may grant anything.
    pub async fn grant_permission(
        &self,
        record_id: Uuid,
        target: &AgentId,
        flags: PermissionFlags,
        grantor: &AgentId,
    ) -> CoreResult<()> {
        let record = self
            .store
            .fetch_record(record_id)
            .await?
            .ok_or(CoreError::NotFound(record_id))?;

        if record.agent_origin != *grantor {
            let held = self
                .store
                .permissions_for(record_id, grantor)
                .await?
                .unwrap_or_default();
            if !held.covers(&flags) {
                return Err(CoreError::Forbidden {
                    agent: grantor.to_string(),
                    permission: "grant",
                    record_id,
                });
            }
        }

        let existing = self
            .store
            .permissions_for(record_id, target)
            .await?
            .unwrap_or_default();
        self.store
            .upsert_permission(record_id, target, existing.merge(&flags))
            .await
    }

    /// Rank the records `agent` can read against the query. Text mode is a
    /// case-insensitive substring count over key and serialized data; vector
    /// mode is cosine similarity over matching-length embeddings. Ties break
    /// by `created_at` descending, then `record_id`.
    pub async fn search_similar(
        &self,
        query: &SearchQuery,
        category: Option<&str>,
        k: usize,
        agent: &AgentId,
    ) -> CoreResult<Vec<MemoryRecord>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let candidates = self.store.list_readable(agent, category).await?;

        let mut scored: Vec<(f64, MemoryRecord)> = match query {
            SearchQuery::Text(needle) => {
                let needle = needle.to_lowercase();
                if needle.is_empty() {
                    return Ok(Vec::new());
                }
                candidates
                    .into_iter()
                    .filter_map(|record| {
                        let haystack_key = record.key.to_lowercase();
                        let haystack_data = record.data.to_string().to_lowercase();
                        let count = count_occurrences(&haystack_key, &needle)
                            + count_occurrences(&haystack_data, &needle);
                        if count == 0 {
                            return None;
                        }
                        #[allow(clippy::cast_precision_loss)]
                        let score = count as f64;
                        Some((score, record))
                    })
                    .collect()
            }
            SearchQuery::Vector(vector) => candidates
                .into_iter()
                .filter(|record| {
                    record
                        .embedding
                        .as_ref()
                        .is_some_and(|e| e.len() == vector.len())
                })
                .map(|record| {
                    let score = record
                        .embedding
                        .as_ref()
                        .map_or(0.0, |e| cosine_similarity(e, vector));
                    (score, record)
                })
                .collect(),
        };

        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        scored.truncate(k);
        Ok(scored.into_iter().map(|(_, record)| record).collect())
    }

    async fn require(&self, record_id: Uuid, agent: &AgentId, which: &'static str) -> CoreResult<()> {
        let flags = self
            .store
            .permissions_for(record_id, agent)
            .await?
            .unwrap_or_default();
        let held = match which {
            "read" => flags.read,
            "write" => flags.write,
            _ => flags.delete,
        };
        if held {
            Ok(())
        } else {
            Err(CoreError::Forbidden {
                agent: agent.to_string(),
                permission: which,
                record_id,
            })
        }
    }
}

/// Non-overlapping occurrence count of `needle` in `haystack`.
fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    let mut count = 0;
    let mut offset = 0;
    while let Some(found) = haystack[offset..].find(needle) {
        count += 1;
        offset += found + needle.len();
    }
    count
}

#[async_trait]
impl SharedMemory for MemoryService {
    async fn put(&self, record: MemoryRecord, owner: &AgentId) -> CoreResult<Uuid> {
        MemoryService::put(self, record, owner).await
    }

    async fn get(&self, id: Uuid, agent: &AgentId) -> CoreResult<MemoryRecord> {
        MemoryService::get(self, id, agent).await
    }

    async fn update(&self, id: Uuid, patch: RecordPatch, agent: &AgentId) -> CoreResult<()> {
        MemoryService::update(self, id, patch, agent).await
    }

    async fn search_similar(
        &self,
        query: SearchQuery,
        category: Option<&str>,
        k: usize,
        agent: &AgentId,
    ) -> CoreResult<Vec<MemoryRecord>> {
        MemoryService::search_similar(self, &query, category, k, agent).await
    }
}
