//! Memory store port - persistence interface for records and permissions.
//!
//! The store is mechanism: it persists rows and answers lookups. Policy
//! (permission checks, ranking, events) lives in `services::MemoryService`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::CoreResult;
use crate::domain::models::{AgentId, MemoryRecord, PermissionFlags};

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert a record together with the owner's full permission grant, in
    /// one transaction. Fails with `DuplicateKey` on id collision.
    async fn insert_record(&self, record: &MemoryRecord) -> CoreResult<()>;

    async fn fetch_record(&self, id: Uuid) -> CoreResult<Option<MemoryRecord>>;

    /// Overwrite the mutable fields of an existing record.
    async fn update_record(&self, record: &MemoryRecord) -> CoreResult<()>;

    /// Delete the record; permission rows cascade.
    async fn delete_record(&self, id: Uuid) -> CoreResult<()>;

    async fn permissions_for(
        &self,
        record_id: Uuid,
        agent: &AgentId,
    ) -> CoreResult<Option<PermissionFlags>>;

    /// Insert or merge a permission grant.
    async fn upsert_permission(
        &self,
        record_id: Uuid,
        agent: &AgentId,
        flags: PermissionFlags,
    ) -> CoreResult<()>;

    /// All records the agent can read, optionally restricted to a category.
    /// Used as the candidate set for similarity ranking.
    async fn list_readable(
        &self,
        agent: &AgentId,
        category: Option<&str>,
    ) -> CoreResult<Vec<MemoryRecord>>;
}
