//! Process entry point: load config, connect to Postgres, run
//! migrations, sweep orphaned jobs, spawn the dispatcher, and serve
//! the HTTP surface with graceful shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scheduler_core::dispatcher::Dispatcher;
use scheduler_core::registry::WorkerRegistry;
use scheduler_core::server::{build_router, AppState};
use scheduler_core::store::{PgStore, Store};
use scheduler_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scheduler_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting scheduler");

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!("configuration loaded");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    tracing::info!("database connected");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;
    tracing::info!("migrations complete");

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let orphaned = store
        .sweep_orphaned_running()
        .await
        .context("failed to sweep orphaned jobs")?;
    if orphaned > 0 {
        tracing::warn!(count = orphaned, "swept RUNNING jobs left over from a prior crash");
    }

    let registry = WorkerRegistry::new();
    let shutdown = CancellationToken::new();

    let dispatcher = Dispatcher::new(store.clone(), registry.clone(), config.clone());
    let dispatcher_shutdown = shutdown.clone();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(dispatcher_shutdown).await;
    });

    let app_state = AppState {
        store,
        registry,
        per_job_estimate_seconds: config.per_job_estimate.as_secs() as i64,
    };
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listen address")?;
    tracing::info!(addr = %config.listen_addr, "listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let ctrl_c = async {
                tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
            };
            #[cfg(unix)]
            let terminate = async {
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler")
                    .recv()
                    .await;
            };
            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => {}
                _ = terminate => {}
            }
            tracing::info!("shutdown signal received");
            server_shutdown.cancel();
        })
        .await
        .context("server error")?;

    dispatcher_handle.await.context("dispatcher task panicked")?;
    Ok(())
}
