use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use uuid::Uuid;

use leadline_core::models::{Task, TaskType};

/// Channel name for PostgreSQL LISTEN/NOTIFY when a new task is created.
pub const TASK_NOTIFY_CHANNEL: &str = "leadline_new_task";

/// Fallback task timeout used by the stale reaper when a row has no
/// per-task timeout.
const REAPER_DEFAULT_TIMEOUT_SECS: i64 = 3600;

const TASK_COLUMNS: &str = r#"
    id,
    task_type,
    status,
    payload,
    result,
    scheduled_at,
    started_at,
    completed_at,
    retry_count,
    max_retries,
    timeout_seconds,
    created_at,
    updated_at
"#;

/// Durable queue storage. Delivery semantics are at-least-once: claiming is
/// atomic (`FOR UPDATE SKIP LOCKED`), but a worker dying mid-task leaves the
/// row in `running` until the reaper resets it for redelivery.
#[derive(Clone)]
pub struct TaskRepository {
    pool: PgPool,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new task and notify listening workers in the same
    /// transaction. `scheduled_at = None` means runnable immediately.
    #[tracing::instrument(skip(self, payload))]
    pub async fn create_task(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
        scheduled_at: Option<DateTime<Utc>>,
        max_retries: i32,
        timeout_seconds: Option<i32>,
    ) -> Result<Task> {
        let scheduled_at = scheduled_at.unwrap_or_else(Utc::now);
        let status = if scheduled_at > Utc::now() {
            "scheduled"
        } else {
            "pending"
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for task creation")?;

        let task: Task = sqlx::query_as::<Postgres, Task>(&format!(
            r#"
            INSERT INTO tasks (task_type, status, payload, scheduled_at, max_retries, timeout_seconds)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(task_type.to_string())
        .bind(status)
        .bind(payload)
        .bind(scheduled_at)
        .bind(max_retries)
        .bind(timeout_seconds)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to insert task into database")?;

        // Wake workers immediately instead of waiting for the poll interval.
        // Non-fatal: workers discover tasks via polling if NOTIFY fails.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, '')")
            .bind(TASK_NOTIFY_CHANNEL)
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(
                error = %e,
                task_id = %task.id,
                "Failed to send pg_notify for new task, workers will discover it via polling"
            );
        }

        tx.commit()
            .await
            .context("Failed to commit transaction for task creation")?;

        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            scheduled_at = %task.scheduled_at,
            "Task created"
        );

        Ok(task)
    }

    /// Atomically claim the next runnable task and mark it running.
    ///
    /// Claim order is `scheduled_at` ascending (FIFO-ish); no ordering is
    /// guaranteed across concurrent workers.
    #[tracing::instrument(skip(self))]
    pub async fn claim_next_task(&self) -> Result<Option<Task>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let task: Option<Task> = sqlx::query_as::<Postgres, Task>(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE status IN ('pending', 'scheduled')
                AND scheduled_at <= NOW()
            ORDER BY scheduled_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        ))
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch next task")?;

        if let Some(task) = task {
            let claimed: Task = sqlx::query_as::<Postgres, Task>(&format!(
                r#"
                UPDATE tasks
                SET status = 'running',
                    started_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                RETURNING {TASK_COLUMNS}
                "#,
            ))
            .bind(task.id)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to mark task as running")?;

            tx.commit().await.context("Failed to commit claim")?;

            tracing::debug!(
                task_id = %claimed.id,
                task_type = %claimed.task_type,
                "Task claimed"
            );

            Ok(Some(claimed))
        } else {
            tx.rollback().await.ok();
            Ok(None)
        }
    }

    /// Mark task as completed with its result.
    #[tracing::instrument(skip(self, result))]
    pub async fn mark_completed(&self, task_id: Uuid, result: serde_json::Value) -> Result<Task> {
        let task: Task = sqlx::query_as::<Postgres, Task>(&format!(
            r#"
            UPDATE tasks
            SET status = 'completed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(task_id)
        .bind(result)
        .fetch_one(&self.pool)
        .await
        .context("Failed to mark task as completed")?;

        tracing::info!(task_id = %task_id, task_type = %task.task_type, "Task completed");

        Ok(task)
    }

    /// Mark task as permanently failed. This is the dead-letter path: the
    /// row keeps the error details for inspection and is never claimed
    /// again.
    #[tracing::instrument(skip(self, error))]
    pub async fn mark_failed(&self, task_id: Uuid, error: serde_json::Value) -> Result<Task> {
        let task: Task = sqlx::query_as::<Postgres, Task>(&format!(
            r#"
            UPDATE tasks
            SET status = 'failed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(task_id)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .context("Failed to mark task as failed")?;

        tracing::error!(
            task_id = %task_id,
            task_type = %task.task_type,
            retry_count = task.retry_count,
            "Task failed"
        );

        Ok(task)
    }

    /// Re-enqueue a task with an updated payload after a delay.
    ///
    /// This is the domain retry path (visibility and capacity waits): the
    /// queue-level `retry_count` is left untouched, so these reschedules can
    /// repeat without ever exhausting the failure budget.
    #[tracing::instrument(skip(self, payload))]
    pub async fn reschedule(
        &self,
        task_id: Uuid,
        delay: Duration,
        payload: serde_json::Value,
    ) -> Result<Task> {
        let task: Task = sqlx::query_as::<Postgres, Task>(&format!(
            r#"
            UPDATE tasks
            SET status = 'scheduled',
                payload = $2,
                scheduled_at = NOW() + ($3::bigint * interval '1 second'),
                started_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(task_id)
        .bind(payload)
        .bind(delay.as_secs() as i64)
        .fetch_one(&self.pool)
        .await
        .context("Failed to reschedule task")?;

        tracing::debug!(
            task_id = %task_id,
            delay_secs = delay.as_secs(),
            "Task rescheduled"
        );

        Ok(task)
    }

    /// Increment the failure retry count and schedule the next attempt
    /// after a backoff. Queue-level failures only.
    #[tracing::instrument(skip(self))]
    pub async fn retry_failed(&self, task_id: Uuid, backoff: Duration) -> Result<Task> {
        let task: Task = sqlx::query_as::<Postgres, Task>(&format!(
            r#"
            UPDATE tasks
            SET status = 'scheduled',
                retry_count = retry_count + 1,
                scheduled_at = NOW() + ($2::bigint * interval '1 second'),
                started_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(task_id)
        .bind(backoff.as_secs() as i64)
        .fetch_one(&self.pool)
        .await
        .context("Failed to schedule task retry")?;

        tracing::info!(
            task_id = %task_id,
            retry_count = task.retry_count,
            max_retries = task.max_retries,
            backoff_secs = backoff.as_secs(),
            "Task retry scheduled"
        );

        Ok(task)
    }

    /// Reset tasks stuck in `running` beyond their timeout plus a grace
    /// period back to `pending`. This is what makes delivery at-least-once
    /// when a worker dies mid-task. Returns the number of rows reset.
    #[tracing::instrument(skip(self))]
    pub async fn reap_stale_running_tasks(&self, grace_period_secs: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending',
                started_at = NULL,
                updated_at = NOW()
            WHERE status = 'running'
                AND started_at IS NOT NULL
                AND started_at
                    + ((COALESCE(timeout_seconds, $1) + $2)::bigint * interval '1 second')
                    < NOW()
            "#,
        )
        .bind(REAPER_DEFAULT_TIMEOUT_SECS)
        .bind(grace_period_secs)
        .execute(&self.pool)
        .await
        .context("Failed to reap stale running tasks")?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::warn!(count = count, "Reset stale running tasks for redelivery");
        }

        Ok(count)
    }

    /// Delete finished tasks (completed or failed) older than the given
    /// number of days. Returns the number of rows deleted.
    #[tracing::instrument(skip(self))]
    pub async fn delete_old_finished_tasks(&self, older_than_days: i32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE status IN ('completed', 'failed')
                AND COALESCE(completed_at, updated_at) < NOW() - ($1 * interval '1 day')
            "#,
        )
        .bind(older_than_days)
        .execute(&self.pool)
        .await
        .context("Failed to delete old finished tasks")?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::info!(
                count = count,
                older_than_days = older_than_days,
                "Deleted old finished tasks"
            );
        }

        Ok(count)
    }
}
