//! Durable persistence contract. `PgStore` is the production
//! implementation; `InMemoryStore` is a test double for unit tests that
//! don't need a real database.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::{Artifact, Job, JobStatus, UsageDaily, User};
use crate::ids::{ArtifactId, JobId, UserId};

/// Field updates applied by `transition_job`. Only the fields relevant
/// to a given transition need to be set; the rest are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobTransitionUpdate {
    pub worker_id: Option<String>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub execution_time_seconds: Option<f64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: UserId,
    pub frontend: String,
    pub bot_id: Option<String>,
    pub capability: crate::domain::Capability,
    pub priority: i16,
    pub params: serde_json::Value,
    pub cost_tokens: rust_decimal::Decimal,
    pub reply_context: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub job_id: JobId,
    pub artifact_type: crate::domain::Capability,
    pub local_path: Option<String>,
    pub public_url: Option<String>,
    pub format: Option<String>,
    pub metadata: serde_json::Value,
}

/// All operations are atomic with respect to the job state machine and
/// usage counters.
#[async_trait]
pub trait Store: Send + Sync {
    /// Idempotent on `(platform, platform_uid)`.
    async fn get_or_create_user(
        &self,
        platform: &str,
        platform_uid: &str,
        ip_address: Option<&str>,
    ) -> crate::AppResult<(User, crate::domain::Plan)>;

    /// Inserts with caller-supplied status (`CREATED`).
    async fn create_job(&self, fields: NewJob) -> crate::AppResult<JobId>;

    /// Compare-and-set on `status`. Returns false if the current status
    /// doesn't match `from`. All terminal transitions stamp `ended_at`.
    async fn transition_job(
        &self,
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
        updates: JobTransitionUpdate,
    ) -> crate::AppResult<bool>;

    /// Atomically selects and claims the highest-priority `QUEUED` job
    /// matching `capabilities`, breaking ties by oldest `created_at`.
    /// No two concurrent callers ever claim the same row.
    async fn claim_next_queued(
        &self,
        worker_id: &str,
        capabilities: &[crate::domain::Capability],
    ) -> crate::AppResult<Option<Job>>;

    /// Counts `QUEUED` rows strictly ahead of `job_id` in dispatch order.
    async fn count_queued_ahead(&self, job_id: JobId) -> crate::AppResult<i64>;

    async fn create_artifact(&self, fields: NewArtifact) -> crate::AppResult<ArtifactId>;

    /// Upsert with additive merge on conflict key `(user_id, date)`.
    async fn increment_usage(
        &self,
        user_id: UserId,
        date: NaiveDate,
        delta_tokens: rust_decimal::Decimal,
        delta_jobs: i32,
    ) -> crate::AppResult<()>;

    /// Returns a zeroed record if none exists yet.
    async fn get_usage(&self, user_id: UserId, date: NaiveDate) -> crate::AppResult<UsageDaily>;

    async fn get_job(&self, job_id: JobId) -> crate::AppResult<Option<Job>>;

    async fn get_artifacts_for_job(&self, job_id: JobId) -> crate::AppResult<Vec<Artifact>>;

    /// Transitions any `RUNNING` job to `FAILED` with `error.code =
    /// "ORPHANED"`. Run once at process start, before the dispatcher
    /// loop begins.
    async fn sweep_orphaned_running(&self) -> crate::AppResult<u64>;
}
