//! Filesystem plan archive: one JSON file per plan under the output
//! directory, named by plan id.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::domain::errors::CoreResult;
use crate::domain::models::Plan;
use crate::domain::ports::PlanArchive;

pub struct FsPlanWriter {
    output_dir: PathBuf,
}

impl FsPlanWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Conventional layout used by the persistence contract.
    pub fn default_layout() -> Self {
        Self::new("planner/output")
    }

    pub fn plan_path(&self, plan: &Plan) -> PathBuf {
        self.output_dir.join(format!("{}.json", plan.plan_id))
    }
}

#[async_trait]
impl PlanArchive for FsPlanWriter {
    async fn store_plan(&self, plan: &Plan) -> CoreResult<()> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.plan_path(plan);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(plan)?;
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PlanMetadata, TagMap};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_store_plan_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FsPlanWriter::new(dir.path());
        let plan = Plan {
            plan_id: Uuid::new_v4(),
            description: "archive me".into(),
            steps: Vec::new(),
            metadata: PlanMetadata {
                created_at: chrono::Utc::now(),
                version: 1,
                priority: 5,
                tags: TagMap::new(),
                estimated_duration_mins: 0,
                source: "test".into(),
                cost_sensitive: false,
            },
        };

        writer.store_plan(&plan).await.unwrap();

        let bytes = tokio::fs::read(writer.plan_path(&plan)).await.unwrap();
        let restored: Plan = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(restored.plan_id, plan.plan_id);
        assert_eq!(restored.description, "archive me");
    }
}
