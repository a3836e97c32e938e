use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::domain::{Artifact, Capability, Job, JobStatus, Plan, UsageDaily, User};
use crate::ids::{ArtifactId, JobId, UserId};
use crate::AppResult;

use super::{JobTransitionUpdate, NewArtifact, NewJob, Store};

/// In-process test double over a `RwLock<HashMap<..>>`. Not used in
/// production; exists so unit tests can exercise admission/dispatch
/// logic without a database.
pub struct InMemoryStore {
    plans: RwLock<HashMap<i32, Plan>>,
    users: RwLock<HashMap<UserId, User>>,
    jobs: RwLock<HashMap<JobId, Job>>,
    artifacts: RwLock<HashMap<ArtifactId, Artifact>>,
    usage: RwLock<HashMap<(UserId, NaiveDate), UsageDaily>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let mut plans = HashMap::new();
        plans.insert(
            Plan::FREE_PLAN_ID,
            Plan {
                id: Plan::FREE_PLAN_ID,
                daily_token_limit: Decimal::new(2000, 2),
                priority: 0,
            },
        );
        Self {
            plans: RwLock::new(plans),
            users: RwLock::new(HashMap::new()),
            jobs: RwLock::new(HashMap::new()),
            artifacts: RwLock::new(HashMap::new()),
            usage: RwLock::new(HashMap::new()),
        }
    }

    /// Seed or overwrite a plan (used by tests to set custom quota limits).
    pub fn seed_plan(&self, plan: Plan) {
        self.plans.write().expect("lock poisoned").insert(plan.id, plan);
    }

    /// Seed a usage row directly (used by the quota-exceeded test scenario).
    pub fn seed_usage(&self, usage: UsageDaily) {
        self.usage
            .write()
            .expect("lock poisoned")
            .insert((usage.user_id, usage.date), usage);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_or_create_user(
        &self,
        platform: &str,
        platform_uid: &str,
        ip_address: Option<&str>,
    ) -> AppResult<(User, Plan)> {
        let mut users = self.users.write().expect("lock poisoned");
        let existing = users
            .values()
            .find(|u| u.platform == platform && u.platform_user_id == platform_uid)
            .cloned();

        let user = match existing {
            Some(u) => u,
            None => {
                let user = User {
                    id: UserId::new(),
                    platform: platform.to_string(),
                    platform_user_id: platform_uid.to_string(),
                    plan_id: Plan::FREE_PLAN_ID,
                    ip_address: ip_address.map(|s| s.to_string()),
                    created_at: Utc::now(),
                };
                users.insert(user.id, user.clone());
                user
            }
        };

        let plan = *self
            .plans
            .read()
            .expect("lock poisoned")
            .get(&user.plan_id)
            .expect("seeded plan must exist");

        Ok((user, plan))
    }

    async fn create_job(&self, fields: NewJob) -> AppResult<JobId> {
        let id = JobId::new();
        let job = Job {
            id,
            user_id: fields.user_id,
            frontend: fields.frontend,
            bot_id: fields.bot_id,
            capability: fields.capability,
            status: JobStatus::Created,
            priority: fields.priority,
            params: fields.params,
            cost_tokens: fields.cost_tokens,
            reply_context: fields.reply_context,
            worker_id: None,
            created_at: Utc::now(),
            queued_at: None,
            started_at: None,
            ended_at: None,
            execution_time_seconds: None,
            error_code: None,
            error_message: None,
            metadata: serde_json::json!({}),
        };
        self.jobs.write().expect("lock poisoned").insert(id, job);
        Ok(id)
    }

    async fn transition_job(
        &self,
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
        updates: JobTransitionUpdate,
    ) -> AppResult<bool> {
        let mut jobs = self.jobs.write().expect("lock poisoned");
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.status != from {
            return Ok(false);
        }

        job.status = to;
        if let Some(worker_id) = updates.worker_id {
            job.worker_id = Some(worker_id);
        }
        if let Some(started_at) = updates.started_at {
            job.started_at = Some(started_at);
        }
        if matches!(to, JobStatus::Queued) {
            job.queued_at = Some(Utc::now());
        }
        if to.is_terminal() {
            job.ended_at = Some(updates.ended_at.unwrap_or_else(Utc::now));
        }
        if let Some(secs) = updates.execution_time_seconds {
            job.execution_time_seconds = Some(secs);
        }
        if let Some(code) = updates.error_code {
            job.error_code = Some(code);
        }
        if let Some(message) = updates.error_message {
            job.error_message = Some(message);
        }
        if let Some(metadata) = updates.metadata {
            job.metadata = metadata;
        }

        Ok(true)
    }

    async fn claim_next_queued(
        &self,
        worker_id: &str,
        capabilities: &[Capability],
    ) -> AppResult<Option<Job>> {
        let mut jobs = self.jobs.write().expect("lock poisoned");
        let candidate_id = jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued && capabilities.contains(&j.capability))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
            })
            .map(|j| j.id);

        let Some(id) = candidate_id else {
            return Ok(None);
        };

        let job = jobs.get_mut(&id).expect("candidate id came from this map");
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.worker_id = Some(worker_id.to_string());
        Ok(Some(job.clone()))
    }

    async fn count_queued_ahead(&self, job_id: JobId) -> AppResult<i64> {
        let jobs = self.jobs.read().expect("lock poisoned");
        let Some(target) = jobs.get(&job_id) else {
            return Ok(0);
        };
        let count = jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Queued
                    && (j.priority > target.priority
                        || (j.priority == target.priority && j.created_at < target.created_at))
            })
            .count();
        Ok(count as i64)
    }

    async fn create_artifact(&self, fields: NewArtifact) -> AppResult<ArtifactId> {
        let id = ArtifactId::new();
        let artifact = Artifact {
            id,
            job_id: fields.job_id,
            artifact_type: fields.artifact_type,
            local_path: fields.local_path,
            public_url: fields.public_url,
            format: fields.format,
            metadata: fields.metadata,
        };
        if !artifact.has_payload() {
            return Err(crate::AppError::Internal(anyhow::anyhow!(
                "artifact for job {} has neither local_path, public_url, nor metadata.content",
                artifact.job_id
            )));
        }
        self.artifacts
            .write()
            .expect("lock poisoned")
            .insert(id, artifact);
        Ok(id)
    }

    async fn increment_usage(
        &self,
        user_id: UserId,
        date: NaiveDate,
        delta_tokens: Decimal,
        delta_jobs: i32,
    ) -> AppResult<()> {
        let mut usage = self.usage.write().expect("lock poisoned");
        let entry = usage
            .entry((user_id, date))
            .or_insert_with(|| UsageDaily::zeroed(user_id, date));
        entry.tokens_used += delta_tokens;
        entry.jobs_completed += delta_jobs;
        Ok(())
    }

    async fn get_usage(&self, user_id: UserId, date: NaiveDate) -> AppResult<UsageDaily> {
        Ok(self
            .usage
            .read()
            .expect("lock poisoned")
            .get(&(user_id, date))
            .cloned()
            .unwrap_or_else(|| UsageDaily::zeroed(user_id, date)))
    }

    async fn get_job(&self, job_id: JobId) -> AppResult<Option<Job>> {
        Ok(self.jobs.read().expect("lock poisoned").get(&job_id).cloned())
    }

    async fn get_artifacts_for_job(&self, job_id: JobId) -> AppResult<Vec<Artifact>> {
        Ok(self
            .artifacts
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn sweep_orphaned_running(&self) -> AppResult<u64> {
        let mut jobs = self.jobs.write().expect("lock poisoned");
        let mut count = 0;
        for job in jobs.values_mut() {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Failed;
                job.ended_at = Some(Utc::now());
                job.error_code = Some("ORPHANED".to_string());
                job.error_message = Some("job was RUNNING when the scheduler restarted".to_string());
                count += 1;
            }
        }
        Ok(count)
    }
}
