//! Handler outcome type.
//!
//! Handlers never talk to the queue directly. They return a tagged outcome
//! and the queue adapter interprets it: `Done` completes the task,
//! `RetryAfter` re-enqueues the same task with an updated payload after a
//! delay, and `Fatal` sends it to the failed/dead-letter path. This keeps
//! retry policy testable without a live queue.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The task's effect is durably committed (or was already in place).
    Done,
    /// Transient condition: run the same task again after `delay`, carrying
    /// `payload` as the new task metadata. Does not consume the queue-level
    /// failure retry budget.
    RetryAfter {
        delay: Duration,
        payload: serde_json::Value,
    },
    /// Permanent failure: the task must not run again.
    Fatal { reason: String },
}

impl TaskOutcome {
    pub fn retry_after(delay: Duration, payload: serde_json::Value) -> Self {
        TaskOutcome::RetryAfter { delay, payload }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        TaskOutcome::Fatal {
            reason: reason.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, TaskOutcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors() {
        let outcome = TaskOutcome::retry_after(
            Duration::from_secs(3),
            serde_json::json!({"appeal_id": 1}),
        );
        assert_eq!(
            outcome,
            TaskOutcome::RetryAfter {
                delay: Duration::from_secs(3),
                payload: serde_json::json!({"appeal_id": 1}),
            }
        );

        assert_eq!(
            TaskOutcome::fatal("gone"),
            TaskOutcome::Fatal {
                reason: "gone".into()
            }
        );

        assert!(TaskOutcome::Done.is_done());
        assert!(!TaskOutcome::fatal("gone").is_done());
    }
}
