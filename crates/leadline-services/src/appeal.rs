//! Appeal state machine.
//!
//! States: ACTIVE (occupies a capacity slot if assigned) and RESOLVED (does
//! not). Resolution is reversible. Every transition that changes "does this
//! appeal occupy a slot" reconciles the operator ledger in the same unit of
//! work.

use leadline_core::models::{slot_delta, Appeal, AppealStatus};
use leadline_core::{AppError, RoutingError};
use leadline_db::AllocationUow;

#[derive(Debug, Clone, Copy, Default)]
pub struct AppealService;

impl AppealService {
    pub fn new() -> Self {
        Self
    }

    /// Insert a new ACTIVE, unassigned appeal.
    ///
    /// The caller commits the unit of work and only then enqueues the
    /// allocation task, so the task message always refers to a durably
    /// committed row (the worker still tolerates replica lag via its
    /// visibility retry).
    pub async fn open_appeal(
        &self,
        uow: &mut dyn AllocationUow,
        lead_id: i64,
        lead_source_id: i64,
    ) -> Result<Appeal, AppError> {
        let appeal = uow.create_appeal(lead_id, lead_source_id).await?;
        tracing::info!(
            appeal_id = appeal.id,
            lead_id = lead_id,
            lead_source_id = lead_source_id,
            "Appeal opened"
        );
        Ok(appeal)
    }

    /// Assign an operator to an appeal. The only place capacity is consumed.
    ///
    /// For an ACTIVE appeal the slot is reserved conditionally: a saturated
    /// or deactivated operator fails the reservation and the call reports
    /// `NoAvailableOperator`, sending the caller back to the retry path.
    /// Writes are flushed into the caller's unit of work; the commit
    /// boundary belongs to the caller.
    pub async fn assign_operator(
        &self,
        uow: &mut dyn AllocationUow,
        appeal: &Appeal,
        operator_id: i64,
    ) -> Result<(), AppError> {
        if appeal.status == AppealStatus::Active {
            let reserved = uow.try_reserve_slot(operator_id).await?;
            if !reserved {
                return Err(RoutingError::NoAvailableOperator {
                    lead_source_id: appeal.lead_source_id,
                }
                .into());
            }
        }

        uow.set_assigned_operator(appeal.id, operator_id).await?;

        tracing::info!(
            appeal_id = appeal.id,
            operator_id = operator_id,
            "Operator assigned to appeal"
        );
        Ok(())
    }

    /// Transition an appeal to `new_status`, reconciling the ledger.
    ///
    /// For an assigned appeal, ACTIVE -> RESOLVED releases exactly one slot
    /// and RESOLVED -> ACTIVE re-consumes exactly one slot; a same-status
    /// call or an unassigned appeal never touches the ledger. Re-activation
    /// does not re-check the limit.
    pub async fn change_status(
        &self,
        uow: &mut dyn AllocationUow,
        appeal: &Appeal,
        new_status: AppealStatus,
    ) -> Result<(), AppError> {
        if appeal.status == new_status {
            return Ok(());
        }

        uow.set_appeal_status(appeal.id, new_status).await?;

        if let Some(operator_id) = appeal.assigned_operator_id {
            let delta = slot_delta(appeal.status, new_status);
            if delta != 0 {
                uow.adjust_active_appeals(operator_id, delta).await?;
            }
        }

        tracing::info!(
            appeal_id = appeal.id,
            from = %appeal.status,
            to = %new_status,
            "Appeal status changed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::AppealRoutingService;
    use leadline_core::models::OperatorStatus;
    use leadline_db::{AllocationStore, MemoryAllocationStore};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    async fn open_committed(store: &MemoryAllocationStore, lead_source_id: i64) -> Appeal {
        let mut uow = store.begin().await.unwrap();
        let appeal = AppealService::new()
            .open_appeal(&mut *uow, 1, lead_source_id)
            .await
            .unwrap();
        uow.commit().await.unwrap();
        appeal
    }

    #[tokio::test]
    async fn assigning_active_appeal_consumes_a_slot() {
        let store = MemoryAllocationStore::new();
        let op = store.add_operator(OperatorStatus::Active, 2);
        let appeal = open_committed(&store, 10).await;

        let mut uow = store.begin().await.unwrap();
        AppealService::new()
            .assign_operator(&mut *uow, &appeal, op)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.appeal(appeal.id).unwrap().assigned_operator_id, Some(op));
        assert_eq!(store.operator(op).unwrap().active_appeals, 1);
    }

    #[tokio::test]
    async fn assigning_resolved_appeal_does_not_consume_a_slot() {
        let store = MemoryAllocationStore::new();
        let op = store.add_operator(OperatorStatus::Active, 2);
        let appeal = open_committed(&store, 10).await;

        let service = AppealService::new();
        let mut uow = store.begin().await.unwrap();
        service
            .change_status(&mut *uow, &appeal, AppealStatus::Resolved)
            .await
            .unwrap();
        let resolved = uow.appeal_by_id(appeal.id).await.unwrap().unwrap();
        service
            .assign_operator(&mut *uow, &resolved, op)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.appeal(appeal.id).unwrap().assigned_operator_id, Some(op));
        assert_eq!(store.operator(op).unwrap().active_appeals, 0);
    }

    #[tokio::test]
    async fn assigning_to_saturated_operator_reports_no_available_operator() {
        let store = MemoryAllocationStore::new();
        let op = store.add_operator(OperatorStatus::Active, 1);
        store.set_active_appeals(op, 1);
        let appeal = open_committed(&store, 10).await;

        let mut uow = store.begin().await.unwrap();
        let err = AppealService::new()
            .assign_operator(&mut *uow, &appeal, op)
            .await
            .unwrap_err();
        assert!(err.is_no_available_operator());
    }

    #[tokio::test]
    async fn resolve_then_reactivate_restores_the_ledger() {
        let store = MemoryAllocationStore::new();
        let op = store.add_operator(OperatorStatus::Active, 3);
        let appeal = open_committed(&store, 10).await;
        let service = AppealService::new();

        let mut uow = store.begin().await.unwrap();
        service.assign_operator(&mut *uow, &appeal, op).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.operator(op).unwrap().active_appeals, 1);

        let mut uow = store.begin().await.unwrap();
        let assigned = uow.appeal_by_id(appeal.id).await.unwrap().unwrap();
        service
            .change_status(&mut *uow, &assigned, AppealStatus::Resolved)
            .await
            .unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.operator(op).unwrap().active_appeals, 0);

        let mut uow = store.begin().await.unwrap();
        let resolved = uow.appeal_by_id(appeal.id).await.unwrap().unwrap();
        service
            .change_status(&mut *uow, &resolved, AppealStatus::Active)
            .await
            .unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.operator(op).unwrap().active_appeals, 1);
    }

    #[tokio::test]
    async fn same_status_transition_is_a_no_op() {
        let store = MemoryAllocationStore::new();
        let op = store.add_operator(OperatorStatus::Active, 3);
        let appeal = open_committed(&store, 10).await;
        let service = AppealService::new();

        let mut uow = store.begin().await.unwrap();
        service.assign_operator(&mut *uow, &appeal, op).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let assigned = uow.appeal_by_id(appeal.id).await.unwrap().unwrap();
        service
            .change_status(&mut *uow, &assigned, AppealStatus::Active)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.operator(op).unwrap().active_appeals, 1);
    }

    #[tokio::test]
    async fn unassigned_appeal_transitions_never_touch_the_ledger() {
        let store = MemoryAllocationStore::new();
        let op = store.add_operator(OperatorStatus::Active, 3);
        store.link_source(10, op, 1);
        let appeal = open_committed(&store, 10).await;
        let service = AppealService::new();

        let mut uow = store.begin().await.unwrap();
        service
            .change_status(&mut *uow, &appeal, AppealStatus::Resolved)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.operator(op).unwrap().active_appeals, 0);
        assert_eq!(
            store.appeal(appeal.id).unwrap().status,
            AppealStatus::Resolved
        );
    }

    /// Weight influences selection but never overrides the capacity ceiling:
    /// a tiny-limit heavy operator saturates after one appeal and the rest
    /// flow to the light operator.
    #[tokio::test]
    async fn weighted_allocation_respects_limits() {
        let store = MemoryAllocationStore::new();
        let heavy = store.add_operator(OperatorStatus::Active, 1);
        let light = store.add_operator(OperatorStatus::Active, 100);
        store.link_source(10, heavy, 1_000_000_000);
        store.link_source(10, light, 1);

        let routing = AppealRoutingService::with_rng(StdRng::seed_from_u64(7));
        let appeals = AppealService::new();

        let mut heavy_count = 0u32;
        let mut light_count = 0u32;
        for _ in 0..20 {
            let appeal = open_committed(&store, 10).await;
            let mut uow = store.begin().await.unwrap();
            let candidate = routing.select_operator(&mut *uow, 10).await.unwrap();
            appeals
                .assign_operator(&mut *uow, &appeal, candidate.operator_id)
                .await
                .unwrap();
            uow.commit().await.unwrap();

            if candidate.operator_id == heavy {
                heavy_count += 1;
            } else {
                light_count += 1;
            }
        }

        assert_eq!(heavy_count, 1);
        assert_eq!(light_count, 19);
        assert_eq!(store.operator(heavy).unwrap().active_appeals, 1);
        assert_eq!(store.operator(light).unwrap().active_appeals, 19);
    }
}
