//! Leadline allocation worker daemon.
//!
//! Consumes allocation tasks from the Postgres-backed queue and assigns
//! operators to appeals. Configuration comes from the environment (see
//! `WorkerConfig`); a `.env` file is loaded if present.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use leadline_core::WorkerConfig;
use leadline_db::{PgAllocationStore, TaskRepository};
use leadline_worker::{AllocateOperatorHandler, Dispatcher, TaskQueue, TaskQueueConfig};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::from_env().context("Failed to load worker configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let store = Arc::new(PgAllocationStore::new(pool.clone()));
    let handler = AllocateOperatorHandler::new(store);
    let dispatcher = Arc::new(Dispatcher::new(handler));

    let queue_config = TaskQueueConfig {
        max_workers: config.max_workers,
        poll_interval_ms: config.poll_interval_ms,
        default_timeout_seconds: config.default_timeout_seconds,
        max_retries: config.max_retries,
        stale_task_reap_interval_secs: config.stale_task_reap_interval_secs,
        stale_task_grace_period_secs: config.stale_task_grace_period_secs,
        finished_task_retention_days: config.finished_task_retention_days,
    };

    let repository = TaskRepository::new(pool.clone());
    let queue = TaskQueue::new(repository, queue_config, dispatcher, Some(pool));

    tracing::info!("Allocation worker started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    queue.shutdown().await;
    tracing::info!("Allocation worker stopped");

    Ok(())
}
