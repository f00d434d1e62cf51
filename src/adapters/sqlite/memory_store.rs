//! SQLite implementation of the `MemoryStore` port.
//!
//! Every public operation runs inside one transaction (SQLite transactions
//! are serializable). Permission rows live in `memory_permissions` and are
//! written atomically with the record they guard.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{AgentId, MemoryRecord, PermissionFlags, RecordMetadata};
use crate::domain::ports::MemoryStore;

#[derive(Clone)]
pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn insert_record(&self, record: &MemoryRecord) -> CoreResult<()> {
        let data_json = record.data.to_string();
        let metadata_json = serde_json::to_string(&record.metadata)?;
        let embedding_json = record
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"INSERT INTO memory_records
               (record_id, key, category, data, agent_origin, embedding, metadata, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.record_id.to_string())
        .bind(&record.key)
        .bind(&record.category)
        .bind(&data_json)
        .bind(record.agent_origin.as_str())
        .bind(embedding_json)
        .bind(&metadata_json)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                return Err(CoreError::DuplicateKey(record.record_id));
            }
            return Err(err.into());
        }

        // The creating agent holds all three flags from the same transaction
        // as the record insert.
        sqlx::query(
            r#"INSERT INTO memory_permissions (record_id, agent_id, can_read, can_write, can_delete)
               VALUES (?, ?, 1, 1, 1)"#,
        )
        .bind(record.record_id.to_string())
        .bind(record.agent_origin.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_record(&self, id: Uuid) -> CoreResult<Option<MemoryRecord>> {
        let row: Option<MemoryRecordRow> =
            sqlx::query_as("SELECT * FROM memory_records WHERE record_id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update_record(&self, record: &MemoryRecord) -> CoreResult<()> {
        let data_json = record.data.to_string();
        let metadata_json = serde_json::to_string(&record.metadata)?;
        let embedding_json = record
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"UPDATE memory_records
               SET data = ?, metadata = ?, embedding = ?, updated_at = ?
               WHERE record_id = ?"#,
        )
        .bind(&data_json)
        .bind(&metadata_json)
        .bind(embedding_json)
        .bind(record.updated_at.to_rfc3339())
        .bind(record.record_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(record.record_id));
        }
        Ok(())
    }

    async fn delete_record(&self, id: Uuid) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM memory_permissions WHERE record_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM memory_records WHERE record_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn permissions_for(
        &self,
        record_id: Uuid,
        agent: &AgentId,
    ) -> CoreResult<Option<PermissionFlags>> {
        let row: Option<(i64, i64, i64)> = sqlx::query_as(
            r#"SELECT can_read, can_write, can_delete
               FROM memory_permissions WHERE record_id = ? AND agent_id = ?"#,
        )
        .bind(record_id.to_string())
        .bind(agent.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(read, write, delete)| PermissionFlags {
            read: read != 0,
            write: write != 0,
            delete: delete != 0,
        }))
    }

    async fn upsert_permission(
        &self,
        record_id: Uuid,
        agent: &AgentId,
        flags: PermissionFlags,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO memory_permissions (record_id, agent_id, can_read, can_write, can_delete)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(record_id, agent_id)
               DO UPDATE SET can_read = excluded.can_read,
                             can_write = excluded.can_write,
                             can_delete = excluded.can_delete"#,
        )
        .bind(record_id.to_string())
        .bind(agent.as_str())
        .bind(i64::from(flags.read))
        .bind(i64::from(flags.write))
        .bind(i64::from(flags.delete))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_readable(
        &self,
        agent: &AgentId,
        category: Option<&str>,
    ) -> CoreResult<Vec<MemoryRecord>> {
        let rows: Vec<MemoryRecordRow> = if let Some(category) = category {
            sqlx::query_as(
                r#"SELECT r.* FROM memory_records r
                   INNER JOIN memory_permissions p ON p.record_id = r.record_id
                   WHERE p.agent_id = ? AND p.can_read = 1 AND r.category = ?
                   ORDER BY r.created_at DESC, r.record_id"#,
            )
            .bind(agent.as_str())
            .bind(category)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                r#"SELECT r.* FROM memory_records r
                   INNER JOIN memory_permissions p ON p.record_id = r.record_id
                   WHERE p.agent_id = ? AND p.can_read = 1
                   ORDER BY r.created_at DESC, r.record_id"#,
            )
            .bind(agent.as_str())
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}

#[derive(sqlx::FromRow)]
struct MemoryRecordRow {
    record_id: String,
    key: String,
    category: String,
    data: String,
    agent_origin: String,
    embedding: Option<String>,
    metadata: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<MemoryRecordRow> for MemoryRecord {
    type Error = CoreError;

    fn try_from(row: MemoryRecordRow) -> Result<Self, Self::Error> {
        let record_id = super::parse_uuid(&row.record_id)?;
        let data = serde_json::from_str(&row.data)?;
        let embedding = row
            .embedding
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let metadata: RecordMetadata = row
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default();

        Ok(MemoryRecord {
            record_id,
            key: row.key,
            category: row.category,
            data,
            agent_origin: AgentId::parse(&row.agent_origin),
            embedding,
            metadata,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
        })
    }
}
