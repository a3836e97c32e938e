use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::Capability;
use crate::ids::{ArtifactId, JobId};

/// Output produced by a completed job. Created only when the owning job
/// transitions to `COMPLETED`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub job_id: JobId,
    #[sqlx(rename = "artifact_type")]
    pub artifact_type: Capability,
    pub local_path: Option<String>,
    pub public_url: Option<String>,
    pub format: Option<String>,
    pub metadata: serde_json::Value,
}

impl Artifact {
    /// At least one of `local_path`, `public_url`, or `metadata.content`
    /// must be populated for a freshly produced artifact.
    pub fn has_payload(&self) -> bool {
        self.local_path.is_some()
            || self.public_url.is_some()
            || self
                .metadata
                .get("content")
                .map(|v| !v.is_null())
                .unwrap_or(false)
    }
}
