//! HTTP surface: admission, status, and heartbeat routes wired onto a
//! shared `AppState` via the plain-REST `axum::extract::State`
//! pattern. See DESIGN.md for why `State` fits better here than an
//! `Extension`-threaded per-request context.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::admission::{self, JobAck, JobRequest};
use crate::domain::{Artifact, Capability, Job, JobStatus};
use crate::ids::{JobId, WorkerId};
use crate::registry::WorkerRegistry;
use crate::store::Store;
use crate::{AppError, AppResult};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: WorkerRegistry,
    pub per_job_estimate_seconds: i64,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/jobs", post(create_job_handler))
        .route("/api/v1/jobs/:id", get(get_job_handler))
        .route("/api/internal/heartbeat", post(heartbeat_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn create_job_handler(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> AppResult<Json<JobAck>> {
    let ack = admission::admit(&state.store, req, state.per_job_estimate_seconds).await?;
    Ok(Json(ack))
}

#[derive(Debug, Serialize)]
struct ArtifactProjection {
    id: crate::ids::ArtifactId,
    #[serde(rename = "type")]
    artifact_type: Capability,
    local_path: Option<String>,
    public_url: Option<String>,
    format: Option<String>,
    metadata: serde_json::Value,
}

impl From<Artifact> for ArtifactProjection {
    fn from(a: Artifact) -> Self {
        Self {
            id: a.id,
            artifact_type: a.artifact_type,
            local_path: a.local_path,
            public_url: a.public_url,
            format: a.format,
            metadata: a.metadata,
        }
    }
}

#[derive(Debug, Serialize)]
struct JobError {
    code: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct JobProjection {
    id: JobId,
    frontend: String,
    bot_id: Option<String>,
    capability: Capability,
    status: JobStatus,
    priority: i16,
    cost_tokens: rust_decimal::Decimal,
    queue_position: Option<i64>,
    worker_id: Option<String>,
    created_at: DateTime<Utc>,
    queued_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    execution_time_seconds: Option<f64>,
    error: Option<JobError>,
    artifacts: Vec<ArtifactProjection>,
}

/// `GET /api/v1/jobs/{id}`, read-side projection. `queue_position` is
/// only meaningful (and only computed) while the job is still `QUEUED`;
/// `artifacts` is only populated once the job is `COMPLETED`.
async fn get_job_handler(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> AppResult<Json<JobProjection>> {
    let job_id: JobId = id.into();
    let job = state
        .store
        .get_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(job_id.to_string()))?;

    let queue_position = if job.status == JobStatus::Queued {
        Some(state.store.count_queued_ahead(job_id).await?)
    } else {
        None
    };

    let artifacts = if job.status == JobStatus::Completed {
        state
            .store
            .get_artifacts_for_job(job_id)
            .await?
            .into_iter()
            .map(ArtifactProjection::from)
            .collect()
    } else {
        Vec::new()
    };

    Ok(Json(project_job(job, queue_position, artifacts)))
}

fn project_job(job: Job, queue_position: Option<i64>, artifacts: Vec<ArtifactProjection>) -> JobProjection {
    JobProjection {
        id: job.id,
        frontend: job.frontend,
        bot_id: job.bot_id,
        capability: job.capability,
        status: job.status,
        priority: job.priority,
        cost_tokens: job.cost_tokens,
        queue_position,
        worker_id: job.worker_id,
        created_at: job.created_at,
        queued_at: job.queued_at,
        started_at: job.started_at,
        ended_at: job.ended_at,
        execution_time_seconds: job.execution_time_seconds,
        error: job.error().map(|e| JobError {
            code: e.code,
            message: e.message,
        }),
        artifacts,
    }
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    worker_id: String,
    url: String,
    capabilities: Vec<String>,
}

#[derive(Debug, Serialize)]
struct HeartbeatResponse {
    status: &'static str,
}

/// `POST /api/internal/heartbeat`. No authentication (trusted
/// network); malformed payloads are rejected rather than silently
/// defaulted (see DESIGN.md).
async fn heartbeat_handler(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> AppResult<Json<HeartbeatResponse>> {
    if req.worker_id.trim().is_empty() {
        return Err(AppError::InvalidRequest("worker_id must not be empty".into()));
    }
    if req.url.trim().is_empty() {
        return Err(AppError::InvalidRequest("url must not be empty".into()));
    }
    if req.capabilities.is_empty() {
        return Err(AppError::InvalidRequest("capabilities must not be empty".into()));
    }

    let capabilities: HashSet<Capability> = req
        .capabilities
        .iter()
        .map(|c| {
            Capability::parse(c).ok_or_else(|| AppError::InvalidRequest(format!("unknown capability {c:?}")))
        })
        .collect::<AppResult<_>>()?;

    state
        .registry
        .register(WorkerId::from(req.worker_id), req.url, capabilities);

    Ok(Json(HeartbeatResponse { status: "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            store: Arc::new(crate::store::InMemoryStore::new()),
            registry: WorkerRegistry::new(),
            per_job_estimate_seconds: 20,
        }
    }

    #[tokio::test]
    async fn health_returns_200() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_job_returns_404() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/jobs/{}", uuid::Uuid::now_v7()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn heartbeat_rejects_empty_capabilities() {
        let app = build_router(test_state());
        let body = serde_json::json!({
            "worker_id": "w1",
            "url": "http://localhost:9000",
            "capabilities": [],
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/internal/heartbeat")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn heartbeat_then_job_admission_then_lookup_round_trips() {
        let state = test_state();
        let app = build_router(state.clone());

        let hb_body = serde_json::json!({
            "worker_id": "w1",
            "url": "http://localhost:9000",
            "capabilities": ["image"],
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/internal/heartbeat")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&hb_body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.registry.len(), 1);

        let job_body = serde_json::json!({
            "frontend": "telegram",
            "capability": "image",
            "user_ref": "telegram:7",
            "params": {"prompt": "cat"},
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&job_body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
