//! Connection management for the memory database.
//!
//! The store lives in a single SQLite file (`memory_db_path` in the core
//! configuration). Opening it creates the file and its parent directory on
//! first use, switches to WAL journaling with foreign keys enforced, and
//! brings the schema up to date through the embedded migrations, so callers
//! always receive a pool the memory store can run against.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

use crate::domain::errors::{CoreError, CoreResult};

use super::migrations::{all_embedded_migrations, Migrator};

/// Pool sizing. The defaults fit a single-process orchestrator where the
/// memory store is shared by a handful of concurrent agents.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(3),
        }
    }
}

/// Open the memory database at `db_path` and migrate it to the current
/// schema. Refuses to open a database written by a newer schema version.
pub async fn open_memory_db(db_path: &str, config: Option<PoolConfig>) -> CoreResult<SqlitePool> {
    if db_path.trim().is_empty() {
        return Err(CoreError::InvalidInput(
            "memory database path cannot be empty".to_string(),
        ));
    }
    ensure_parent_dir(db_path)?;

    let config = config.unwrap_or_default();
    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(connect_options)
        .await?;

    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await?;

    Ok(pool)
}

/// In-memory pool for tests. A single connection keeps the database alive
/// for the pool's lifetime; the schema is not applied here (see
/// `create_migrated_test_pool`).
pub async fn create_test_pool() -> CoreResult<SqlitePool> {
    let connect_options = SqliteConnectOptions::new()
        .filename(":memory:")
        .foreign_keys(true)
        .shared_cache(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await?;
    Ok(pool)
}

fn ensure_parent_dir(db_path: &str) -> CoreResult<()> {
    if db_path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_directory_and_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("memory.db");
        let db_path = db_path.to_str().unwrap();

        let pool = open_memory_db(db_path, None).await.unwrap();

        // The schema is in place: the memory tables answer queries.
        sqlx::query("SELECT COUNT(*) FROM memory_records")
            .fetch_one(&pool)
            .await
            .unwrap();
        let version = Migrator::new(pool).get_current_version().await.unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_reopening_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("memory.db");
        let db_path = db_path.to_str().unwrap();

        let first = open_memory_db(db_path, None).await.unwrap();
        drop(first);
        open_memory_db(db_path, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_path_is_invalid() {
        let err = open_memory_db("  ", None).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
