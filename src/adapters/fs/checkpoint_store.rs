//! Filesystem checkpoint store.
//!
//! Layout: `<root>/<workflow_id>/<checkpoint_id>.json`. Writes go through a
//! temp file and rename so a crash never leaves a half-written checkpoint.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::domain::errors::CoreResult;
use crate::domain::models::WorkflowCheckpoint;
use crate::domain::ports::CheckpointStore;

pub struct FsCheckpointStore {
    root: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Conventional layout used by the persistence contract.
    pub fn default_layout() -> Self {
        Self::new("workflow/reports")
    }

    fn workflow_dir(&self, workflow_id: Uuid) -> PathBuf {
        self.root.join(workflow_id.to_string())
    }

    fn checkpoint_path(&self, workflow_id: Uuid, checkpoint_id: Uuid) -> PathBuf {
        self.workflow_dir(workflow_id)
            .join(format!("{checkpoint_id}.json"))
    }

    async fn read_checkpoint(path: &Path) -> CoreResult<WorkflowCheckpoint> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> CoreResult<()> {
        let dir = self.workflow_dir(checkpoint.workflow_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.checkpoint_path(checkpoint.workflow_id, checkpoint.checkpoint_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(
        &self,
        workflow_id: Uuid,
        checkpoint_id: Uuid,
    ) -> CoreResult<Option<WorkflowCheckpoint>> {
        let path = self.checkpoint_path(workflow_id, checkpoint_id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_checkpoint(&path).await.map(Some)
    }

    async fn latest(&self, workflow_id: Uuid) -> CoreResult<Option<WorkflowCheckpoint>> {
        let dir = self.workflow_dir(workflow_id);
        if !dir.exists() {
            return Ok(None);
        }

        let mut latest: Option<WorkflowCheckpoint> = None;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let checkpoint = match Self::read_checkpoint(&path).await {
                Ok(c) => c,
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping unreadable checkpoint");
                    continue;
                }
            };
            let newer = latest
                .as_ref()
                .is_none_or(|current| checkpoint.created_at > current.created_at);
            if newer {
                latest = Some(checkpoint);
            }
        }
        Ok(latest)
    }

    async fn list(&self, workflow_id: Uuid) -> CoreResult<Vec<Uuid>> {
        let dir = self.workflow_dir(workflow_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut found: Vec<(chrono::DateTime<chrono::Utc>, Uuid)> = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(checkpoint) = Self::read_checkpoint(&path).await {
                found.push((checkpoint.created_at, checkpoint.checkpoint_id));
            }
        }
        found.sort();
        Ok(found.into_iter().map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ExecuteOptions, StepId, TaskState};
    use std::collections::BTreeMap;

    fn checkpoint(workflow_id: Uuid) -> WorkflowCheckpoint {
        let mut states = BTreeMap::new();
        states.insert(StepId("seq_1".into()), TaskState::pending());
        WorkflowCheckpoint::new(
            workflow_id,
            Uuid::new_v4(),
            states,
            vec![StepId("seq_1".into())],
            ExecuteOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let workflow_id = Uuid::new_v4();
        let cp = checkpoint(workflow_id);

        store.save(&cp).await.unwrap();
        let loaded = store
            .load(workflow_id, cp.checkpoint_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.task_states, cp.task_states);
        assert_eq!(loaded.checkpoint_id, cp.checkpoint_id);
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        assert!(store
            .load(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_latest_picks_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let workflow_id = Uuid::new_v4();

        let mut first = checkpoint(workflow_id);
        first.created_at = chrono::Utc::now() - chrono::Duration::seconds(60);
        let second = checkpoint(workflow_id);

        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let latest = store.latest(workflow_id).await.unwrap().unwrap();
        assert_eq!(latest.checkpoint_id, second.checkpoint_id);

        let ids = store.list(workflow_id).await.unwrap();
        assert_eq!(ids, vec![first.checkpoint_id, second.checkpoint_id]);
    }
}
