//! SQLite adapters: connection pool, migrations, and the memory store.

pub mod connection;
pub mod memory_store;
pub mod migrations;

pub use connection::{create_test_pool, open_memory_db, PoolConfig};
pub use memory_store::SqliteMemoryStore;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};

/// Fresh in-memory pool with all migrations applied. Test helper.
pub async fn create_migrated_test_pool() -> CoreResult<SqlitePool> {
    let pool = create_test_pool().await?;
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await?;
    Ok(pool)
}

pub(crate) fn parse_uuid(value: &str) -> CoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| CoreError::Serialization(format!("invalid uuid '{value}': {e}")))
}

pub(crate) fn parse_datetime(value: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::Serialization(format!("invalid timestamp '{value}': {e}")))
}
