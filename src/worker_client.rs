//! HTTP client for the scheduler -> worker RPC. One `reqwest::Client`
//! is built once and shared, rather than constructed per call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Capability, Job, WorkerRecord};

#[derive(Debug, Serialize)]
struct RunJobRequest<'a> {
    job_id: String,
    params: &'a serde_json::Value,
    timeout_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct WorkerArtifact {
    #[serde(rename = "type")]
    pub artifact_type: Option<Capability>,
    pub path: Option<String>,
    pub url: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct WorkerErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct WorkerRunResponse {
    pub status: String,
    pub job_id: String,
    pub execution_time_seconds: Option<f64>,
    #[serde(default)]
    pub artifacts: Vec<WorkerArtifact>,
    pub error: Option<WorkerErrorBody>,
}

#[derive(Debug, Error)]
pub enum WorkerRpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("worker returned {status}: {body}")]
    NonSuccess { status: reqwest::StatusCode, body: String },

    #[error("malformed response body: {0}")]
    MalformedBody(String),
}

pub struct WorkerClient {
    http: reqwest::Client,
    worker_timeout_seconds: u64,
}

impl WorkerClient {
    /// `grace` is added on top of `worker_timeout` to give the worker
    /// room to respond after its own deadline (the
    /// `WORKER_TIMEOUT_SECONDS + DISPATCH_GRACE_SECONDS` network cap).
    pub fn new(worker_timeout: std::time::Duration, grace: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(worker_timeout + grace)
            .build()
            .expect("reqwest client builds with a well-formed config");
        Self {
            http,
            worker_timeout_seconds: worker_timeout.as_secs(),
        }
    }

    pub async fn run_job(
        &self,
        worker: &WorkerRecord,
        job: &Job,
    ) -> Result<WorkerRunResponse, WorkerRpcError> {
        let url = format!("{}/worker/run_job", worker.base_url.trim_end_matches('/'));
        let request = RunJobRequest {
            job_id: job.id.to_string(),
            params: &job.params,
            timeout_seconds: self.worker_timeout_seconds,
        };

        let response = self.http.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerRpcError::NonSuccess { status, body });
        }

        response
            .json::<WorkerRunResponse>()
            .await
            .map_err(|e| WorkerRpcError::MalformedBody(e.to_string()))
    }
}
