use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    AllocateOperator,
}

impl Display for TaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskType::AllocateOperator => write!(f, "allocate_operator"),
        }
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allocate_operator" => Ok(TaskType::AllocateOperator),
            _ => Err(anyhow::anyhow!("Invalid task type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Scheduled,
    Completed,
    Failed,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Scheduled => write!(f, "scheduled"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "scheduled" => Ok(TaskStatus::Scheduled),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

/// A durable queue task. Delivery is at-least-once: a claimed task whose
/// worker dies is reaped back to `pending` and redelivered, so handlers must
/// tolerate re-execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Queue-level failure retries only. Domain reschedules (capacity or
    /// visibility waits) never count against this.
    pub retry_count: i32,
    pub max_retries: i32,
    pub timeout_seconds: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Task {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Task {
            id: row.get("id"),
            task_type: row.get::<String, _>("task_type").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse task_type: {}", e).into())
            })?,
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse task status: {}", e).into())
            })?,
            payload: row.get("payload"),
            result: row.get("result"),
            scheduled_at: row.get("scheduled_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            timeout_seconds: row.get("timeout_seconds"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl Task {
    pub fn is_ready_to_run(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Scheduled)
            && self.scheduled_at <= Utc::now()
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Extract the payload as a typed struct, returning an error on failure.
    pub fn try_payload_as<P: TaskPayload>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Create a payload value from a typed struct.
    pub fn payload_from<P: TaskPayload>(payload: &P) -> serde_json::Value {
        serde_json::to_value(payload).unwrap_or_default()
    }
}

/// Trait for type-safe task payloads
pub trait TaskPayload: Serialize + for<'de> Deserialize<'de> {
    fn task_type() -> TaskType;
}

/// Inbound allocation message: `{ appeal_id, retry_count? }`.
///
/// `reread_count` tracks how many times the worker has re-enqueued this task
/// because the appeal row was not yet visible. It is carried in the payload
/// (not in the queue's `retry_count` column) so capacity waits never consume
/// the visibility budget. Producers may send it under either name;
/// `retry_count` is the inbound wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateOperatorPayload {
    pub appeal_id: i64,
    #[serde(default, alias = "retry_count")]
    pub reread_count: u32,
}

impl TaskPayload for AllocateOperatorPayload {
    fn task_type() -> TaskType {
        TaskType::AllocateOperator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(status: TaskStatus, retry_count: i32) -> Task {
        Task {
            id: Uuid::new_v4(),
            task_type: TaskType::AllocateOperator,
            status,
            payload: serde_json::json!({"appeal_id": 1}),
            result: None,
            scheduled_at: Utc::now() - chrono::Duration::seconds(1),
            started_at: None,
            completed_at: None,
            retry_count,
            max_retries: 3,
            timeout_seconds: Some(60),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn task_type_round_trip() {
        assert_eq!(TaskType::AllocateOperator.to_string(), "allocate_operator");
        assert_eq!(
            "allocate_operator".parse::<TaskType>().unwrap(),
            TaskType::AllocateOperator
        );
        assert!("unknown_type".parse::<TaskType>().is_err());
    }

    #[test]
    fn task_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Scheduled,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn pending_task_is_ready() {
        assert!(task(TaskStatus::Pending, 0).is_ready_to_run());
        assert!(task(TaskStatus::Scheduled, 0).is_ready_to_run());
    }

    #[test]
    fn running_task_is_not_ready() {
        assert!(!task(TaskStatus::Running, 0).is_ready_to_run());
    }

    #[test]
    fn future_scheduled_task_is_not_ready() {
        let mut t = task(TaskStatus::Scheduled, 0);
        t.scheduled_at = Utc::now() + chrono::Duration::seconds(30);
        assert!(!t.is_ready_to_run());
    }

    #[test]
    fn retry_budget() {
        assert!(task(TaskStatus::Failed, 2).can_retry());
        assert!(!task(TaskStatus::Failed, 3).can_retry());
        assert!(!task(TaskStatus::Failed, 5).can_retry());
    }

    #[test]
    fn reread_count_defaults_to_zero() {
        let payload: AllocateOperatorPayload =
            serde_json::from_value(serde_json::json!({"appeal_id": 42})).unwrap();
        assert_eq!(payload.appeal_id, 42);
        assert_eq!(payload.reread_count, 0);
    }

    #[test]
    fn inbound_retry_count_field_is_accepted() {
        let payload: AllocateOperatorPayload =
            serde_json::from_value(serde_json::json!({"appeal_id": 42, "retry_count": 2}))
                .unwrap();
        assert_eq!(payload.reread_count, 2);
    }

    #[test]
    fn payload_round_trip() {
        let payload = AllocateOperatorPayload {
            appeal_id: 7,
            reread_count: 2,
        };
        let value = Task::payload_from(&payload);
        let mut t = task(TaskStatus::Pending, 0);
        t.payload = value;
        let back: AllocateOperatorPayload = t.try_payload_as().unwrap();
        assert_eq!(back.appeal_id, 7);
        assert_eq!(back.reread_count, 2);
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let mut t = task(TaskStatus::Pending, 0);
        t.payload = serde_json::json!({"reread_count": 1});
        assert!(t.try_payload_as::<AllocateOperatorPayload>().is_err());
    }
}
