//! Transactional unit-of-work seam for the allocation workflow.
//!
//! The worker and the services read and write appeal/operator rows through
//! one unit of work per task execution; the single commit point belongs to
//! the caller. Two backends implement the seam: PostgreSQL for production
//! and an in-memory store for tests and local development.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use leadline_core::models::{Appeal, AppealStatus, RoutingCandidate};
use leadline_core::AppError;

pub use memory::MemoryAllocationStore;
pub use postgres::PgAllocationStore;

/// Source of allocation units of work.
#[async_trait]
pub trait AllocationStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn AllocationUow>, AppError>;
}

/// One transactional unit of work over appeal and operator rows.
///
/// Reads observe the unit's own snapshot (read-your-writes); nothing is
/// durably visible until `commit`. Dropping a unit without committing
/// discards its writes.
#[async_trait]
pub trait AllocationUow: Send {
    async fn appeal_by_id(&mut self, appeal_id: i64) -> Result<Option<Appeal>, AppError>;

    /// Eligible operators for a lead source: routing edges joined with
    /// their operator, filtered to ACTIVE operators with spare capacity.
    /// The returned `active_appeals` snapshot may be stale by commit time;
    /// the slot reservation re-checks.
    async fn routing_candidates(
        &mut self,
        lead_source_id: i64,
    ) -> Result<Vec<RoutingCandidate>, AppError>;

    /// Insert a new ACTIVE, unassigned appeal.
    async fn create_appeal(&mut self, lead_id: i64, lead_source_id: i64)
        -> Result<Appeal, AppError>;

    async fn set_assigned_operator(
        &mut self,
        appeal_id: i64,
        operator_id: i64,
    ) -> Result<(), AppError>;

    async fn set_appeal_status(
        &mut self,
        appeal_id: i64,
        status: AppealStatus,
    ) -> Result<(), AppError>;

    /// Conditionally consume one capacity slot: increments the operator's
    /// ledger iff it is ACTIVE with spare capacity. Returns `false` when the
    /// operator is saturated or inactive; the caller treats that exactly
    /// like "no available operator".
    async fn try_reserve_slot(&mut self, operator_id: i64) -> Result<bool, AppError>;

    /// Unconditional ledger adjustment for status transitions of
    /// already-assigned appeals. A decrement below zero is clamped and
    /// logged as an anomaly instead of failing the transition.
    async fn adjust_active_appeals(
        &mut self,
        operator_id: i64,
        delta: i32,
    ) -> Result<(), AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}
