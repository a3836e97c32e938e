use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

use crate::domain::{Artifact, Capability, Job, JobStatus, Plan, UsageDaily, User};
use crate::ids::{ArtifactId, JobId, UserId};
use crate::{AppError, AppResult};

use super::{JobTransitionUpdate, NewArtifact, NewJob, Store};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_or_create_user(
        &self,
        platform: &str,
        platform_uid: &str,
        ip_address: Option<&str>,
    ) -> AppResult<(User, Plan)> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, platform, platform_user_id, plan_id, ip_address, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (platform, platform_user_id)
            DO UPDATE SET platform = EXCLUDED.platform
            RETURNING id, platform, platform_user_id, plan_id, ip_address, created_at
            "#,
        )
        .bind(UserId::new())
        .bind(platform)
        .bind(platform_uid)
        .bind(Plan::FREE_PLAN_ID)
        .bind(ip_address)
        .fetch_one(&self.pool)
        .await?;

        let plan = sqlx::query_as::<_, Plan>(
            "SELECT id, daily_token_limit, priority FROM plans WHERE id = $1",
        )
        .bind(user.plan_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((user, plan))
    }

    async fn create_job(&self, fields: NewJob) -> AppResult<JobId> {
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, user_id, frontend, bot_id, capability, status, priority,
                params, cost_tokens, reply_context, created_at, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), $11)
            RETURNING id
            "#,
        )
        .bind(JobId::new())
        .bind(fields.user_id)
        .bind(&fields.frontend)
        .bind(&fields.bot_id)
        .bind(fields.capability)
        .bind(JobStatus::Created)
        .bind(fields.priority)
        .bind(&fields.params)
        .bind(fields.cost_tokens)
        .bind(&fields.reply_context)
        .bind(serde_json::json!({}))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<JobId, _>("id"))
    }

    async fn transition_job(
        &self,
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
        updates: JobTransitionUpdate,
    ) -> AppResult<bool> {
        let queued_at = matches!(to, JobStatus::Queued).then(Utc::now);
        let ended_at = if to.is_terminal() {
            Some(updates.ended_at.unwrap_or_else(Utc::now))
        } else {
            None
        };

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1,
                worker_id = COALESCE($2, worker_id),
                started_at = COALESCE($3, started_at),
                queued_at = COALESCE($4, queued_at),
                ended_at = COALESCE($5, ended_at),
                execution_time_seconds = COALESCE($6, execution_time_seconds),
                error_code = COALESCE($7, error_code),
                error_message = COALESCE($8, error_message),
                metadata = COALESCE($9, metadata)
            WHERE id = $10 AND status = $11
            "#,
        )
        .bind(to)
        .bind(&updates.worker_id)
        .bind(updates.started_at)
        .bind(queued_at)
        .bind(ended_at)
        .bind(updates.execution_time_seconds)
        .bind(&updates.error_code)
        .bind(&updates.error_message)
        .bind(&updates.metadata)
        .bind(job_id)
        .bind(from)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim_next_queued(
        &self,
        worker_id: &str,
        capabilities: &[Capability],
    ) -> AppResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            WITH next_job AS (
                SELECT id
                FROM jobs
                WHERE status = 'queued' AND capability = ANY($1)
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running',
                started_at = NOW(),
                worker_id = $2
            WHERE id IN (SELECT id FROM next_job)
            RETURNING id, user_id, frontend, bot_id, capability, status, priority,
                      params, cost_tokens, reply_context, worker_id, created_at,
                      queued_at, started_at, ended_at, execution_time_seconds,
                      error_code, error_message, metadata
            "#,
        )
        .bind(capabilities)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn count_queued_ahead(&self, job_id: JobId) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM jobs AS ahead
            JOIN jobs AS target ON target.id = $1
            WHERE ahead.status = 'queued'
              AND (
                  ahead.priority > target.priority
                  OR (ahead.priority = target.priority AND ahead.created_at < target.created_at)
              )
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn create_artifact(&self, fields: NewArtifact) -> AppResult<ArtifactId> {
        let id = ArtifactId::new();
        let artifact = Artifact {
            id,
            job_id: fields.job_id,
            artifact_type: fields.artifact_type,
            local_path: fields.local_path.clone(),
            public_url: fields.public_url.clone(),
            format: fields.format.clone(),
            metadata: fields.metadata.clone(),
        };
        if !artifact.has_payload() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "artifact for job {} has neither local_path, public_url, nor metadata.content",
                fields.job_id
            )));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO artifacts (id, job_id, artifact_type, local_path, public_url, format, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(fields.job_id)
        .bind(fields.artifact_type)
        .bind(&fields.local_path)
        .bind(&fields.public_url)
        .bind(&fields.format)
        .bind(&fields.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<ArtifactId, _>("id"))
    }

    async fn increment_usage(
        &self,
        user_id: UserId,
        date: NaiveDate,
        delta_tokens: Decimal,
        delta_jobs: i32,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_daily (user_id, date, tokens_used, jobs_completed)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, date)
            DO UPDATE SET
                tokens_used = usage_daily.tokens_used + EXCLUDED.tokens_used,
                jobs_completed = usage_daily.jobs_completed + EXCLUDED.jobs_completed
            "#,
        )
        .bind(user_id)
        .bind(date)
        .bind(delta_tokens)
        .bind(delta_jobs)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_usage(&self, user_id: UserId, date: NaiveDate) -> AppResult<UsageDaily> {
        let usage = sqlx::query_as::<_, UsageDaily>(
            "SELECT user_id, date, tokens_used, jobs_completed FROM usage_daily WHERE user_id = $1 AND date = $2",
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(usage.unwrap_or_else(|| UsageDaily::zeroed(user_id, date)))
    }

    async fn get_job(&self, job_id: JobId) -> AppResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, user_id, frontend, bot_id, capability, status, priority,
                   params, cost_tokens, reply_context, worker_id, created_at,
                   queued_at, started_at, ended_at, execution_time_seconds,
                   error_code, error_message, metadata
            FROM jobs WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get_artifacts_for_job(&self, job_id: JobId) -> AppResult<Vec<Artifact>> {
        let artifacts = sqlx::query_as::<_, Artifact>(
            "SELECT id, job_id, artifact_type, local_path, public_url, format, metadata FROM artifacts WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(artifacts)
    }

    async fn sweep_orphaned_running(&self) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                ended_at = NOW(),
                error_code = 'ORPHANED',
                error_message = 'job was RUNNING when the scheduler restarted'
            WHERE status = 'running'
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
