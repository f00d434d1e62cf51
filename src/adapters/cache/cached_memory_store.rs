//! Cached wrapper for the memory store using a moka TTL cache.
//!
//! Caches `fetch_record` lookups by record id. Writes to a record
//! invalidate its entry, so readers never see a stale copy of an updated or
//! deleted record. Permission lookups and scans are not cached (they gate
//! access and must stay exact). Every correctness property holds with the
//! cache removed; this is purely a read-path optimization.

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::CoreResult;
use crate::domain::models::{AgentId, MemoryRecord, PermissionFlags};
use crate::domain::ports::MemoryStore;

/// Default TTL for cached records.
const RECORD_CACHE_TTL_SECS: u64 = 60;

/// Maximum number of cached records.
const RECORD_CACHE_MAX_CAPACITY: u64 = 1024;

pub struct CachedMemoryStore<S: MemoryStore> {
    inner: Arc<S>,
    records: Cache<Uuid, Arc<MemoryRecord>>,
}

impl<S: MemoryStore> CachedMemoryStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self::with_ttl(inner, Duration::from_secs(RECORD_CACHE_TTL_SECS))
    }

    pub fn with_ttl(inner: Arc<S>, ttl: Duration) -> Self {
        let records = Cache::builder()
            .max_capacity(RECORD_CACHE_MAX_CAPACITY)
            .time_to_live(ttl)
            .build();
        Self { inner, records }
    }

    async fn invalidate(&self, id: Uuid) {
        self.records.invalidate(&id).await;
    }
}

#[async_trait]
impl<S: MemoryStore + 'static> MemoryStore for CachedMemoryStore<S> {
    async fn insert_record(&self, record: &MemoryRecord) -> CoreResult<()> {
        self.inner.insert_record(record).await
    }

    async fn fetch_record(&self, id: Uuid) -> CoreResult<Option<MemoryRecord>> {
        if let Some(cached) = self.records.get(&id).await {
            return Ok(Some((*cached).clone()));
        }
        let fetched = self.inner.fetch_record(id).await?;
        if let Some(ref record) = fetched {
            self.records.insert(id, Arc::new(record.clone())).await;
        }
        Ok(fetched)
    }

    async fn update_record(&self, record: &MemoryRecord) -> CoreResult<()> {
        let result = self.inner.update_record(record).await;
        if result.is_ok() {
            self.invalidate(record.record_id).await;
        }
        result
    }

    async fn delete_record(&self, id: Uuid) -> CoreResult<()> {
        let result = self.inner.delete_record(id).await;
        if result.is_ok() {
            self.invalidate(id).await;
        }
        result
    }

    async fn permissions_for(
        &self,
        record_id: Uuid,
        agent: &AgentId,
    ) -> CoreResult<Option<PermissionFlags>> {
        self.inner.permissions_for(record_id, agent).await
    }

    async fn upsert_permission(
        &self,
        record_id: Uuid,
        agent: &AgentId,
        flags: PermissionFlags,
    ) -> CoreResult<()> {
        self.inner.upsert_permission(record_id, agent, flags).await
    }

    async fn list_readable(
        &self,
        agent: &AgentId,
        category: Option<&str>,
    ) -> CoreResult<Vec<MemoryRecord>> {
        self.inner.list_readable(agent, category).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteMemoryStore};

    async fn cached() -> CachedMemoryStore<SqliteMemoryStore> {
        let pool = create_migrated_test_pool().await.unwrap();
        CachedMemoryStore::new(Arc::new(SqliteMemoryStore::new(pool)))
    }

    fn record(key: &str) -> MemoryRecord {
        MemoryRecord::new(key, "solutions", serde_json::json!({}), AgentId::Developer)
    }

    #[tokio::test]
    async fn test_fetch_is_cached() {
        let store = cached().await;
        let record = record("cached");
        store.insert_record(&record).await.unwrap();

        let first = store.fetch_record(record.record_id).await.unwrap().unwrap();
        let second = store.fetch_record(record.record_id).await.unwrap().unwrap();
        assert_eq!(first.key, second.key);
    }

    #[tokio::test]
    async fn test_update_invalidates() {
        let store = cached().await;
        let mut record = record("stale");
        store.insert_record(&record).await.unwrap();
        let _ = store.fetch_record(record.record_id).await.unwrap();

        record.data = serde_json::json!({"fresh": true});
        store.update_record(&record).await.unwrap();

        let fetched = store.fetch_record(record.record_id).await.unwrap().unwrap();
        assert_eq!(fetched.data, serde_json::json!({"fresh": true}));
    }

    #[tokio::test]
    async fn test_delete_invalidates() {
        let store = cached().await;
        let record = record("doomed");
        store.insert_record(&record).await.unwrap();
        let _ = store.fetch_record(record.record_id).await.unwrap();

        store.delete_record(record.record_id).await.unwrap();
        assert!(store.fetch_record(record.record_id).await.unwrap().is_none());
    }
}
