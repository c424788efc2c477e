//! Task queue: worker pool, LISTEN/NOTIFY or polling, outcome
//! interpretation, and submission.
//!
//! Shutdown: [`TaskQueue::shutdown`] signals the pool to stop; it does not
//! wait for in-flight tasks. For graceful shutdown, allow time for running
//! tasks to finish before process exit.

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use leadline_core::models::{AllocateOperatorPayload, Task, TaskType};
use leadline_core::{TaskError, TaskOutcome};
use leadline_db::{TaskRepository, TASK_NOTIFY_CHANNEL};

use crate::context::TaskDispatch;

/// Maximum delay in seconds before retrying a task that failed at the
/// queue level. Caps exponential backoff so that high retry counts do not
/// produce excessively long delays.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Computes backoff in seconds for a given retry count (exponential with cap).
#[inline]
pub(crate) fn compute_retry_backoff_seconds(retry_count: i32) -> u64 {
    (2_u64.pow(retry_count as u32)).min(MAX_RETRY_BACKOFF_SECS)
}

#[derive(Clone)]
pub struct TaskQueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub default_timeout_seconds: i32,
    /// Queue-level failure retry budget. Domain reschedules (visibility and
    /// capacity waits) do not count against it.
    pub max_retries: i32,
    /// Interval in seconds between runs of the stale task reaper.
    pub stale_task_reap_interval_secs: u64,
    /// Grace period in seconds added to task timeout before reaping stale
    /// running tasks.
    pub stale_task_grace_period_secs: i64,
    /// Finished tasks older than this are deleted by the maintenance loop.
    pub finished_task_retention_days: i32,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 1000,
            default_timeout_seconds: 60,
            max_retries: 3,
            stale_task_reap_interval_secs: 60,
            stale_task_grace_period_secs: 300,
            finished_task_retention_days: 30,
        }
    }
}

#[derive(Clone)]
pub struct TaskQueue {
    repository: TaskRepository,
    config: TaskQueueConfig,
    shutdown_tx: mpsc::Sender<()>,
}

impl TaskQueue {
    /// Create a new TaskQueue and start its worker pool.
    ///
    /// If `pool` is `Some`, the worker uses PostgreSQL LISTEN/NOTIFY to wake
    /// immediately when tasks are created, in addition to polling at
    /// `poll_interval_ms`. If `pool` is `None`, only polling is used.
    pub fn new(
        repository: TaskRepository,
        config: TaskQueueConfig,
        dispatch: Arc<dyn TaskDispatch>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let repo_clone = repository.clone();
        let config_clone = config.clone();

        tokio::spawn(async move {
            Self::worker_pool(repo_clone, config_clone, dispatch, shutdown_rx, pool).await;
        });

        Self {
            repository,
            config,
            shutdown_tx,
        }
    }

    /// Enqueue an allocation task for a freshly committed appeal.
    ///
    /// Producers call this after the appeal row is durably committed; the
    /// worker still tolerates a not-yet-visible row via its visibility
    /// retry.
    #[tracing::instrument(skip(self))]
    pub async fn submit_allocation(&self, appeal_id: i64) -> Result<Uuid> {
        let payload = Task::payload_from(&AllocateOperatorPayload {
            appeal_id,
            reread_count: 0,
        });

        let task = self
            .repository
            .create_task(
                TaskType::AllocateOperator,
                payload,
                None,
                self.config.max_retries,
                Some(self.config.default_timeout_seconds),
            )
            .await
            .context("Failed to enqueue allocation task")?;

        tracing::info!(
            task_id = %task.id,
            appeal_id = appeal_id,
            "Allocation task submitted"
        );

        Ok(task.id)
    }

    async fn worker_pool(
        repository: TaskRepository,
        config: TaskQueueConfig,
        dispatch: Arc<dyn TaskDispatch>,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
    ) {
        let use_listen = pool.is_some();
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = use_listen,
            "Task queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        // Channel to wake the main loop when LISTEN receives a NOTIFY
        // (avoids blocking on recv when no pool).
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        if let Some(pool) = pool {
            let tx = notify_tx.clone();
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(TASK_NOTIFY_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                tokio::time::sleep(Duration::from_secs(5)).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                let _ = tx.send(()).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });
        }

        // Spawn maintenance loop: stale task reaping plus finished task
        // cleanup (if interval > 0)
        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if config.stale_task_reap_interval_secs > 0 {
            let repo_for_reaper = repository.clone();
            let reap_interval = Duration::from_secs(config.stale_task_reap_interval_secs);
            let grace_period = config.stale_task_grace_period_secs;
            let retention_days = config.finished_task_retention_days;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = repo_for_reaper.reap_stale_running_tasks(grace_period).await {
                                tracing::error!(error = %e, "Stale task reaper failed");
                            }
                            if let Err(e) = repo_for_reaper.delete_old_finished_tasks(retention_days).await {
                                tracing::error!(error = %e, "Finished task cleanup failed");
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Task queue worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = notify_rx.recv() => {
                    Self::claim_and_dispatch_one(&repository, &semaphore, &dispatch).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(&repository, &semaphore, &dispatch).await;
                }
            }
        }

        tracing::info!("Task queue worker pool stopped");
    }

    async fn claim_and_dispatch_one(
        repository: &TaskRepository,
        semaphore: &Arc<Semaphore>,
        dispatch: &Arc<dyn TaskDispatch>,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match repository.claim_next_task().await {
            Ok(Some(task)) => {
                let repo = repository.clone();
                let dispatch = Arc::clone(dispatch);

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = Self::process_task(task, repo, dispatch).await {
                        tracing::error!(error = %e, "Task processing failed");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No tasks available in queue");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim task from queue");
            }
        }
    }

    #[tracing::instrument(skip(repository, dispatch), fields(task.id = %task.id, task.type = %task.task_type))]
    async fn process_task(
        task: Task,
        repository: TaskRepository,
        dispatch: Arc<dyn TaskDispatch>,
    ) -> Result<()> {
        let timeout_duration = task
            .timeout_seconds
            .map(|s| Duration::from_secs(s as u64))
            .unwrap_or(Duration::from_secs(3600));

        let result = tokio::time::timeout(timeout_duration, dispatch.dispatch_task(&task)).await;

        match result {
            Ok(Ok(TaskOutcome::Done)) => {
                repository
                    .mark_completed(task.id, serde_json::Value::Null)
                    .await
                    .context("Failed to mark task as completed")?;
                Ok(())
            }
            Ok(Ok(TaskOutcome::RetryAfter { delay, payload })) => {
                // Domain wait, not a failure: reschedule with the updated
                // payload and leave the retry budget untouched.
                repository
                    .reschedule(task.id, delay, payload)
                    .await
                    .context("Failed to reschedule task")?;
                Ok(())
            }
            Ok(Ok(TaskOutcome::Fatal { reason })) => {
                repository
                    .mark_failed(task.id, json!({ "error": &reason, "fatal": true }))
                    .await
                    .context("Failed to mark task as failed")?;
                Err(anyhow::anyhow!("task failed permanently: {}", reason))
            }
            Ok(Err(e)) => {
                let is_unrecoverable = e
                    .downcast_ref::<TaskError>()
                    .map(|te| !te.is_recoverable())
                    .unwrap_or(false);

                tracing::error!(
                    task_id = %task.id,
                    error = %e,
                    retry_count = task.retry_count,
                    max_retries = task.max_retries,
                    unrecoverable = is_unrecoverable,
                    "Task execution failed"
                );

                if is_unrecoverable {
                    repository
                        .mark_failed(
                            task.id,
                            json!({
                                "error": e.to_string(),
                                "retry_count": task.retry_count,
                                "unrecoverable": true,
                            }),
                        )
                        .await
                        .context("Failed to mark task as failed")?;
                    return Err(e);
                }

                if task.can_retry() {
                    let backoff = compute_retry_backoff_seconds(task.retry_count);
                    repository
                        .retry_failed(task.id, Duration::from_secs(backoff))
                        .await?;
                    Ok(())
                } else {
                    repository
                        .mark_failed(
                            task.id,
                            json!({
                                "error": e.to_string(),
                                "retry_count": task.retry_count,
                                "reason": "Task failed after maximum retries",
                            }),
                        )
                        .await
                        .context("Failed to mark task as failed")?;
                    Err(e)
                }
            }
            Err(_) => {
                tracing::error!(
                    task_id = %task.id,
                    timeout_seconds = ?task.timeout_seconds,
                    "Task execution timed out"
                );
                if task.can_retry() {
                    let backoff = compute_retry_backoff_seconds(task.retry_count);
                    repository
                        .retry_failed(task.id, Duration::from_secs(backoff))
                        .await?;
                    Ok(())
                } else {
                    repository
                        .mark_failed(
                            task.id,
                            json!({
                                "error": "Task execution timed out",
                                "timeout_seconds": task.timeout_seconds,
                            }),
                        )
                        .await?;
                    Err(anyhow::anyhow!("Task execution timed out"))
                }
            }
        }
    }

    /// Signals the worker pool to stop claiming new tasks and exit the main
    /// loop. Returns immediately; already-spawned task handlers continue
    /// running until they complete or time out.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating task queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_backoff_exponential_then_capped() {
        assert_eq!(compute_retry_backoff_seconds(0), 1);
        assert_eq!(compute_retry_backoff_seconds(1), 2);
        assert_eq!(compute_retry_backoff_seconds(2), 4);
        assert_eq!(compute_retry_backoff_seconds(8), 256);
        assert_eq!(compute_retry_backoff_seconds(9), MAX_RETRY_BACKOFF_SECS);
        assert_eq!(compute_retry_backoff_seconds(10), MAX_RETRY_BACKOFF_SECS);
    }

    #[test]
    fn unrecoverable_task_error_detected() {
        let err: anyhow::Error =
            TaskError::unrecoverable(anyhow::anyhow!("bad payload")).into();
        let is_unrecoverable = err
            .downcast_ref::<TaskError>()
            .map(|te| !te.is_recoverable())
            .unwrap_or(false);
        assert!(is_unrecoverable);
    }

    #[test]
    fn generic_error_treated_as_recoverable() {
        let err: anyhow::Error = anyhow::anyhow!("connection reset");
        let is_unrecoverable = err
            .downcast_ref::<TaskError>()
            .map(|te| !te.is_recoverable())
            .unwrap_or(false);
        assert!(!is_unrecoverable);
    }
}
