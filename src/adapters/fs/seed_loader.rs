//! Seed record loader: bootstraps the memory store from JSON files.
//!
//! Each file under the seed directory holds either one record or an array
//! of records in seed form. Seeds without an explicit origin are owned by
//! the `brain` agent. Records that collide with existing ids are skipped so
//! seeding is idempotent.

use serde::Deserialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{AgentId, MemoryRecord};
use crate::services::memory_service::MemoryService;

/// On-disk shape of one seed record.
#[derive(Debug, Deserialize)]
struct SeedRecord {
    #[serde(default)]
    record_id: Option<Uuid>,
    key: String,
    category: String,
    data: serde_json::Value,
    #[serde(default)]
    agent_origin: Option<AgentId>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SeedFile {
    One(SeedRecord),
    Many(Vec<SeedRecord>),
}

pub struct SeedLoader {
    seed_dir: PathBuf,
}

impl SeedLoader {
    pub fn new(seed_dir: impl Into<PathBuf>) -> Self {
        Self {
            seed_dir: seed_dir.into(),
        }
    }

    /// Conventional layout used by the persistence contract.
    pub fn default_layout() -> Self {
        Self::new("data/seed/memory")
    }

    /// Load every seed file into the memory service; returns how many
    /// records were inserted. A missing seed directory is not an error.
    pub async fn load_into(&self, memory: &MemoryService) -> CoreResult<usize> {
        if !self.seed_dir.exists() {
            return Ok(0);
        }

        let mut inserted = 0;
        let mut entries = tokio::fs::read_dir(&self.seed_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let parsed: SeedFile = serde_json::from_slice(&bytes).map_err(|e| {
                CoreError::Serialization(format!("seed file {}: {e}", path.display()))
            })?;
            let seeds = match parsed {
                SeedFile::One(seed) => vec![seed],
                SeedFile::Many(seeds) => seeds,
            };

            for seed in seeds {
                let owner = seed.agent_origin.clone().unwrap_or(AgentId::Brain);
                let mut record =
                    MemoryRecord::new(seed.key, seed.category, seed.data, owner.clone())
                        .with_tags(seed.tags);
                if let Some(id) = seed.record_id {
                    record.record_id = id;
                }
                if let Some(embedding) = seed.embedding {
                    record = record.with_embedding(embedding);
                }

                match memory.put(record, &owner).await {
                    Ok(_) => inserted += 1,
                    Err(CoreError::DuplicateKey(_)) => {
                        tracing::debug!(path = %path.display(), "seed record already present");
                    }
                    Err(error) => return Err(error),
                }
            }
        }

        tracing::info!(count = inserted, dir = %self.seed_dir.display(), "seeded memory records");
        Ok(inserted)
    }
}
