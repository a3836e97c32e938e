//! Dispatcher: the background loop that pairs idle workers with
//! queued jobs, issues the worker RPC, and drives each job to a
//! terminal state. A `loop` that checks a `CancellationToken`, claims
//! work, and spawns one task per in-flight dispatch so the control
//! loop never blocks.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::domain::{Job, JobStatus, WorkerRecord};
use crate::ids::WorkerId;
use crate::registry::WorkerRegistry;
use crate::store::{JobTransitionUpdate, NewArtifact, Store};
use crate::worker_client::WorkerClient;

pub struct Dispatcher {
    store: Arc<dyn Store>,
    registry: WorkerRegistry,
    client: Arc<WorkerClient>,
    config: Config,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, registry: WorkerRegistry, config: Config) -> Self {
        let client = Arc::new(WorkerClient::new(config.worker_timeout, config.dispatch_grace));
        Self {
            store,
            registry,
            client,
            config,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("dispatcher starting");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.try_dispatch_one().await {
                Ok(true) => continue,
                Ok(false) => {
                    self.registry.forget_stale(to_chrono(self.config.heartbeat_ttl));
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.idle_poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "dispatch iteration failed, backing off");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        info!("dispatcher stopped");
    }

    /// One iteration of the loop: find an idle worker, claim a matching
    /// job, mark the worker busy, and spawn its run independently.
    /// Returns `Ok(true)` if a job was dispatched (so the caller should
    /// immediately try again instead of sleeping).
    async fn try_dispatch_one(&self) -> anyhow::Result<bool> {
        let idle = self.registry.healthy_idle_workers(to_chrono(self.config.heartbeat_ttl));
        let Some(worker) = idle.into_iter().next() else {
            return Ok(false);
        };

        let capabilities: Vec<_> = worker.capabilities.iter().copied().collect();
        let job = self.store.claim_next_queued(&worker.id.0, &capabilities).await?;
        let Some(job) = job else {
            return Ok(false);
        };

        self.registry.mark_busy(&worker.id);
        debug!(job_id = %job.id, worker_id = %worker.id, "dispatching job");

        let store = self.store.clone();
        let registry = self.registry.clone();
        let client = self.client.clone();
        tokio::spawn(run_job(store, registry, client, worker, job));

        Ok(true)
    }
}

fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::seconds(0))
}

/// Releases the worker back to idle on every exit path, including a
/// panic inside `run_job`, by doing the release in `Drop` rather than
/// at the end of the function body.
struct IdleGuard {
    registry: WorkerRegistry,
    worker_id: WorkerId,
}

impl Drop for IdleGuard {
    fn drop(&mut self) {
        self.registry.mark_idle(&self.worker_id);
    }
}

async fn run_job(
    store: Arc<dyn Store>,
    registry: WorkerRegistry,
    client: Arc<WorkerClient>,
    worker: WorkerRecord,
    job: Job,
) {
    let _guard = IdleGuard {
        registry,
        worker_id: worker.id.clone(),
    };

    match client.run_job(&worker, &job).await {
        Ok(response) if response.status == "completed" => {
            if let Err(e) = complete(&store, &job, response).await {
                error!(job_id = %job.id, error = %e, "failed to record job completion");
            }
        }
        Ok(response) => {
            let message = response
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "worker reported failure".to_string());
            if let Err(e) = fail(&store, &job, "WORKER_REPORTED_FAILURE", &message).await {
                error!(job_id = %job.id, error = %e, "failed to record worker-reported failure");
            }
        }
        Err(rpc_err) => {
            warn!(job_id = %job.id, error = %rpc_err, "worker rpc failed");
            if let Err(e) = fail(&store, &job, "DISPATCH_ERROR", &rpc_err.to_string()).await {
                error!(job_id = %job.id, error = %e, "failed to record dispatch error");
            }
        }
    }
}

async fn complete(
    store: &Arc<dyn Store>,
    job: &Job,
    response: crate::worker_client::WorkerRunResponse,
) -> anyhow::Result<()> {
    let mut artifact_ids = Vec::with_capacity(response.artifacts.len());
    for artifact in &response.artifacts {
        let id = store
            .create_artifact(NewArtifact {
                job_id: job.id,
                artifact_type: artifact.artifact_type.unwrap_or(job.capability),
                local_path: artifact.path.clone(),
                public_url: artifact.url.clone(),
                format: None,
                metadata: artifact.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
            })
            .await?;
        artifact_ids.push(id.to_string());
    }

    let transitioned = store
        .transition_job(
            job.id,
            JobStatus::Running,
            JobStatus::Completed,
            JobTransitionUpdate {
                ended_at: Some(Utc::now()),
                execution_time_seconds: response.execution_time_seconds,
                metadata: Some(serde_json::json!({ "artifact_ids": artifact_ids })),
                ..Default::default()
            },
        )
        .await?;

    if !transitioned {
        warn!(job_id = %job.id, "job was no longer RUNNING at completion time, skipping usage update");
        return Ok(());
    }

    store
        .increment_usage(job.user_id, Utc::now().date_naive(), job.cost_tokens, 1)
        .await?;

    Ok(())
}

async fn fail(store: &Arc<dyn Store>, job: &Job, code: &str, message: &str) -> anyhow::Result<()> {
    let transitioned = store
        .transition_job(
            job.id,
            JobStatus::Running,
            JobStatus::Failed,
            JobTransitionUpdate {
                ended_at: Some(Utc::now()),
                error_code: Some(code.to_string()),
                error_message: Some(message.to_string()),
                ..Default::default()
            },
        )
        .await?;

    if !transitioned {
        warn!(job_id = %job.id, "job was no longer RUNNING at failure time, skipping transition");
    }

    Ok(())
}

