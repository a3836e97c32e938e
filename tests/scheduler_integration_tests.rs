//! End-to-end integration tests against a real Postgres container and
//! a mocked worker process.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scheduler_core::admission::{self, JobRequest};
use scheduler_core::config::Config;
use scheduler_core::dispatcher::Dispatcher;
use scheduler_core::domain::{Capability, JobStatus};
use scheduler_core::ids::WorkerId;
use scheduler_core::registry::WorkerRegistry;
use scheduler_core::store::{PgStore, Store};

fn test_config() -> Config {
    Config {
        database_url: String::new(),
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        heartbeat_ttl: std::time::Duration::from_secs(60),
        worker_timeout: std::time::Duration::from_secs(5),
        dispatch_grace: std::time::Duration::from_secs(2),
        idle_poll_interval: std::time::Duration::from_millis(20),
        error_backoff: std::time::Duration::from_millis(50),
        per_job_estimate: std::time::Duration::from_secs(20),
    }
}

#[tokio::test]
async fn get_or_create_user_is_idempotent_under_concurrency() {
    let pool = common::test_pool().await;
    let store = Arc::new(PgStore::new(pool));
    let uid = format!("concurrent-{}", uuid::Uuid::now_v7());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let uid = uid.clone();
        handles.push(tokio::spawn(async move {
            store.get_or_create_user("telegram", &uid, None).await.unwrap().0.id
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }
    assert_eq!(ids.len(), 1, "concurrent get_or_create_user calls must converge on one user row");
}

#[tokio::test]
async fn claim_next_queued_under_concurrency_returns_each_job_once() {
    let pool = common::test_pool().await;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let uid = format!("claimer-{}", uuid::Uuid::now_v7());
    let (user, _) = store.get_or_create_user("telegram", &uid, None).await.unwrap();

    let mut job_ids = Vec::new();
    for _ in 0..5 {
        let job_id = store
            .create_job(scheduler_core::store::NewJob {
                user_id: user.id,
                frontend: "telegram".into(),
                bot_id: None,
                capability: Capability::Audio,
                priority: 0,
                params: serde_json::json!({}),
                cost_tokens: Decimal::new(50, 2),
                reply_context: serde_json::json!({}),
            })
            .await
            .unwrap();
        store
            .transition_job(
                job_id,
                JobStatus::Created,
                JobStatus::Queued,
                Default::default(),
            )
            .await
            .unwrap();
        job_ids.push(job_id);
    }

    let mut handles = Vec::new();
    for i in 0..5 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .claim_next_queued(&format!("w{i}"), &[Capability::Audio])
                .await
                .unwrap()
        }));
    }

    let mut claimed = HashSet::new();
    for handle in handles {
        if let Some(job) = handle.await.unwrap() {
            assert!(job_ids.contains(&job.id), "claimed job must be one of ours");
            assert!(claimed.insert(job.id), "no job should be claimed twice");
        }
    }
    assert_eq!(claimed.len(), 5, "all five distinct jobs should have been claimed exactly once");
}

#[tokio::test]
async fn admission_rejects_when_quota_would_be_exceeded() {
    let pool = common::test_pool().await;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let uid = format!("quota-{}", uuid::Uuid::now_v7());
    let (user, _) = store.get_or_create_user("telegram", &uid, None).await.unwrap();
    store
        .increment_usage(user.id, chrono::Utc::now().date_naive(), Decimal::new(1950, 2), 3)
        .await
        .unwrap();

    let req = JobRequest {
        frontend: "telegram".into(),
        bot_id: None,
        capability: "image".into(),
        user_ref: format!("telegram:{uid}"),
        params: serde_json::json!({"prompt": "cat"}),
        reply_context: None,
    };
    let result = admission::admit(&store, req, test_config().per_job_estimate.as_secs() as i64).await;
    assert!(matches!(result, Err(scheduler_core::AppError::QuotaExceeded)));
}

/// Happy path, image: admit a job, let a mocked worker complete it,
/// and assert the job lands in COMPLETED with an artifact and an
/// updated usage counter.
#[tokio::test]
async fn happy_path_dispatch_completes_job_and_records_usage() {
    let pool = common::test_pool().await;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/worker/run_job"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "completed",
            "job_id": "unused",
            "execution_time_seconds": 1.5,
            "artifacts": [{"type": "image", "path": "/tmp/out.png"}],
        })))
        .mount(&mock_server)
        .await;

    let uid = format!("happy-{}", uuid::Uuid::now_v7());
    let req = JobRequest {
        frontend: "telegram".into(),
        bot_id: None,
        capability: "image".into(),
        user_ref: format!("telegram:{uid}"),
        params: serde_json::json!({"prompt": "cat"}),
        reply_context: None,
    };
    let ack = admission::admit(&store, req, test_config().per_job_estimate.as_secs() as i64).await.unwrap();
    assert_eq!(ack.queue_position, 0);

    let registry = WorkerRegistry::new();
    registry.register(
        WorkerId::from("w1".to_string()),
        mock_server.uri(),
        [Capability::Image].into_iter().collect(),
    );

    let dispatcher = Dispatcher::new(store.clone(), registry, test_config());
    let shutdown = tokio_util::sync::CancellationToken::new();
    let shutdown_for_dispatcher = shutdown.clone();
    let handle = tokio::spawn(async move { dispatcher.run(shutdown_for_dispatcher).await });

    let mut job = store.get_job(ack.job_id).await.unwrap().unwrap();
    for _ in 0..50 {
        if job.status == JobStatus::Completed || job.status == JobStatus::Failed {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        job = store.get_job(ack.job_id).await.unwrap().unwrap();
    }
    shutdown.cancel();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;

    assert_eq!(job.status, JobStatus::Completed);
    let artifacts = store.get_artifacts_for_job(ack.job_id).await.unwrap();
    assert_eq!(artifacts.len(), 1);

    let usage = store.get_usage(job.user_id, chrono::Utc::now().date_naive()).await.unwrap();
    assert_eq!(usage.tokens_used, Decimal::new(100, 2));
    assert_eq!(usage.jobs_completed, 1);
}

/// Worker failure: a 500 response drives the job to FAILED with
/// DISPATCH_ERROR and leaves usage untouched.
#[tokio::test]
async fn worker_failure_marks_job_failed_without_charging_usage() {
    let pool = common::test_pool().await;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/worker/run_job"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let uid = format!("fail-{}", uuid::Uuid::now_v7());
    let req = JobRequest {
        frontend: "telegram".into(),
        bot_id: None,
        capability: "text".into(),
        user_ref: format!("telegram:{uid}"),
        params: serde_json::json!({"prompt": "hi"}),
        reply_context: None,
    };
    let ack = admission::admit(&store, req, test_config().per_job_estimate.as_secs() as i64).await.unwrap();

    let registry = WorkerRegistry::new();
    registry.register(
        WorkerId::from("w2".to_string()),
        mock_server.uri(),
        [Capability::Text].into_iter().collect(),
    );

    let dispatcher = Dispatcher::new(store.clone(), registry.clone(), test_config());
    let shutdown = tokio_util::sync::CancellationToken::new();
    let shutdown_for_dispatcher = shutdown.clone();
    let handle = tokio::spawn(async move { dispatcher.run(shutdown_for_dispatcher).await });

    let mut job = store.get_job(ack.job_id).await.unwrap().unwrap();
    for _ in 0..50 {
        if job.status.is_terminal() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        job = store.get_job(ack.job_id).await.unwrap().unwrap();
    }
    shutdown.cancel();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error().unwrap().code, "DISPATCH_ERROR");

    let usage = store.get_usage(job.user_id, chrono::Utc::now().date_naive()).await.unwrap();
    assert_eq!(usage.tokens_used, Decimal::ZERO);

    // the worker must be released back to idle within bounded time
    for _ in 0..20 {
        if !registry.healthy_idle_workers(Duration::seconds(60)).is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    assert_eq!(registry.healthy_idle_workers(Duration::seconds(60)).len(), 1);
}
