//! Allocate-operator task handler.
//!
//! One execution owns one unit of work. The assignment commit is the sole
//! commit point: every other path rolls back and either reschedules the
//! task or fails it, so no partial assignment is ever durably visible.
//! Executions are safe to repeat — queue redelivery of an already-assigned
//! appeal is a no-op.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::rngs::StdRng;

use leadline_core::models::{AllocateOperatorPayload, Task};
use leadline_core::{RoutingError, TaskOutcome, TaskResultExt};
use leadline_db::AllocationStore;
use leadline_services::{AppealRoutingService, AppealService};

/// How many times a task is re-enqueued when the appeal row is not yet
/// visible (replica lag, producer transaction not yet committed) before the
/// missing row is treated as a producer bug and the task fails permanently.
pub const VISIBILITY_RETRY_LIMIT: u32 = 3;

/// Fixed delay between attempts while every eligible operator is saturated.
/// This retry is unbounded: capacity is expected to free up as other
/// appeals resolve, and a stuck appeal throttles itself to one attempt per
/// delay instead of hot-looping.
pub const CAPACITY_RETRY_DELAY: Duration = Duration::from_secs(3);

pub struct AllocateOperatorHandler {
    store: Arc<dyn AllocationStore>,
    routing: AppealRoutingService,
    appeals: AppealService,
}

impl AllocateOperatorHandler {
    pub fn new(store: Arc<dyn AllocationStore>) -> Self {
        Self {
            store,
            routing: AppealRoutingService::new(),
            appeals: AppealService::new(),
        }
    }

    /// Handler with a caller-provided RNG for the weighted draw
    /// (deterministic tests).
    pub fn with_rng(store: Arc<dyn AllocationStore>, rng: StdRng) -> Self {
        Self {
            store,
            routing: AppealRoutingService::with_rng(rng),
            appeals: AppealService::new(),
        }
    }

    pub async fn handle(&self, task: &Task) -> Result<TaskOutcome> {
        let payload: AllocateOperatorPayload = task.try_payload_as().unrecoverable()?;

        let mut uow = self.store.begin().await?;

        let Some(appeal) = uow.appeal_by_id(payload.appeal_id).await? else {
            uow.rollback().await?;
            return Ok(visibility_outcome(&payload));
        };

        if appeal.is_assigned() {
            // Queue-level redelivery of an already-committed assignment.
            uow.rollback().await?;
            tracing::info!(
                appeal_id = appeal.id,
                operator_id = appeal.assigned_operator_id,
                "Appeal already assigned, skipping allocation"
            );
            return Ok(TaskOutcome::Done);
        }

        let assigned = match self
            .routing
            .select_operator(&mut *uow, appeal.lead_source_id)
            .await
        {
            Ok(candidate) => self
                .appeals
                .assign_operator(&mut *uow, &appeal, candidate.operator_id)
                .await
                .map(|_| candidate),
            Err(err) => Err(err),
        };

        match assigned {
            Ok(candidate) => {
                uow.commit().await?;
                tracing::info!(
                    appeal_id = appeal.id,
                    operator_id = candidate.operator_id,
                    "Appeal allocated"
                );
                Ok(TaskOutcome::Done)
            }
            Err(err) if err.is_no_available_operator() => {
                uow.rollback().await?;
                tracing::debug!(
                    appeal_id = appeal.id,
                    lead_source_id = appeal.lead_source_id,
                    retry_secs = CAPACITY_RETRY_DELAY.as_secs(),
                    "No operator has spare capacity, rescheduling"
                );
                Ok(TaskOutcome::retry_after(
                    CAPACITY_RETRY_DELAY,
                    task.payload.clone(),
                ))
            }
            Err(err) => {
                uow.rollback().await?;
                Err(err.into())
            }
        }
    }
}

/// Outcome for an appeal row that is not yet visible: re-enqueue with an
/// incremented counter and a linearly increasing delay (1s, 2s, 3s), then
/// give up permanently once the bound is exhausted.
fn visibility_outcome(payload: &AllocateOperatorPayload) -> TaskOutcome {
    if payload.reread_count >= VISIBILITY_RETRY_LIMIT {
        tracing::error!(
            appeal_id = payload.appeal_id,
            reread_count = payload.reread_count,
            "Re-read retries exceeded, failing allocation task"
        );
        return TaskOutcome::fatal(format!(
            "re-read retries exceeded: {}",
            RoutingError::AppealNotFound {
                appeal_id: payload.appeal_id,
            }
        ));
    }

    let next = AllocateOperatorPayload {
        appeal_id: payload.appeal_id,
        reread_count: payload.reread_count + 1,
    };
    tracing::warn!(
        appeal_id = next.appeal_id,
        reread_count = next.reread_count,
        "Appeal not yet visible, rescheduling re-read"
    );
    TaskOutcome::retry_after(
        Duration::from_secs(u64::from(next.reread_count)),
        Task::payload_from(&next),
    )
}
