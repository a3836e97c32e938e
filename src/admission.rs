//! Admission Service: validates inbound job requests, checks quota,
//! and enqueues. Synchronous from the caller's perspective; must
//! complete in bounded time regardless of queue depth.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::Capability;
use crate::ids::JobId;
use crate::store::{NewJob, Store};
use crate::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct JobRequest {
    pub frontend: String,
    pub bot_id: Option<String>,
    pub capability: String,
    pub user_ref: String,
    pub params: serde_json::Value,
    pub reply_context: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct JobAck {
    pub job_id: JobId,
    pub status: &'static str,
    pub queue_position: i64,
    pub estimated_time_seconds: i64,
    pub cost_tokens: Decimal,
}

/// Deterministic token cost for a capability/params pair. Lives on its
/// own so it can be unit tested without a Store.
pub fn cost_of(capability: Capability, _params: &serde_json::Value) -> Decimal {
    match capability {
        Capability::Image => Decimal::new(100, 2),
        Capability::Text => Decimal::new(50, 2),
        Capability::Audio => Decimal::new(50, 2),
        Capability::Video => Decimal::new(200, 2),
    }
}

/// Splits `"<platform>:<uid>"` on the *last* `:` so a `uid` containing
/// colons is preserved, matching the prototype's
/// `request.user_ref.split(":")[-1]`.
fn parse_user_ref(user_ref: &str) -> Option<(&str, &str)> {
    let idx = user_ref.rfind(':')?;
    let (platform, rest) = user_ref.split_at(idx);
    let uid = &rest[1..];
    if platform.is_empty() || uid.is_empty() {
        return None;
    }
    Some((platform, uid))
}

fn validate(req: &JobRequest) -> AppResult<Capability> {
    if req.frontend.trim().is_empty() {
        return Err(AppError::InvalidRequest("frontend must not be empty".into()));
    }
    if !req.params.is_object() {
        return Err(AppError::InvalidRequest("params must be a JSON object".into()));
    }
    parse_user_ref(&req.user_ref)
        .ok_or_else(|| AppError::InvalidRequest("user_ref must be \"<platform>:<uid>\"".into()))?;
    Capability::parse(&req.capability)
        .ok_or_else(|| AppError::InvalidRequest(format!("unknown capability {:?}", req.capability)))
}

pub async fn admit(
    store: &Arc<dyn Store>,
    req: JobRequest,
    per_job_estimate_seconds: i64,
) -> AppResult<JobAck> {
    let capability = validate(&req)?;
    // `frontend` is the authoritative platform (spec.md §4.3 step 1); the
    // text before the last `:` in `user_ref` is only validated for shape,
    // not used as the lookup key.
    let (_, uid) = parse_user_ref(&req.user_ref).expect("validated above");

    let (user, plan) = store.get_or_create_user(&req.frontend, uid, None).await?;
    let today = Utc::now().date_naive();
    let usage = store.get_usage(user.id, today).await?;

    let cost = cost_of(capability, &req.params);
    if usage.tokens_used + cost > plan.daily_token_limit {
        return Err(AppError::QuotaExceeded);
    }

    let job_id = store
        .create_job(NewJob {
            user_id: user.id,
            frontend: req.frontend,
            bot_id: req.bot_id,
            capability,
            priority: plan.priority,
            params: req.params,
            cost_tokens: cost,
            reply_context: req.reply_context.unwrap_or_else(|| serde_json::json!({})),
        })
        .await?;

    let transitioned = store
        .transition_job(
            job_id,
            crate::domain::JobStatus::Created,
            crate::domain::JobStatus::Queued,
            crate::store::JobTransitionUpdate::default(),
        )
        .await?;
    debug_assert!(transitioned, "freshly created job must still be CREATED");

    let queue_position = store.count_queued_ahead(job_id).await?;
    let estimated_time_seconds = (queue_position + 1) * per_job_estimate_seconds;

    Ok(JobAck {
        job_id,
        status: "QUEUED",
        queue_position,
        estimated_time_seconds,
        cost_tokens: cost,
    })
}
