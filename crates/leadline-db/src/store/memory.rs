//! In-memory implementation of the allocation store.
//!
//! Snapshot-per-unit semantics: a unit of work clones the shared state on
//! `begin`, works on the clone, and swaps it back on `commit`. That gives
//! read-your-writes and discard-on-rollback, but not MVCC — interleaved
//! units lose each other's writes, so this backend is for tests and
//! single-writer local runs only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use leadline_core::models::{
    Appeal, AppealStatus, LeadSourceOperator, Operator, OperatorStatus, RoutingCandidate,
};
use leadline_core::AppError;

use super::{AllocationStore, AllocationUow};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    operators: HashMap<i64, Operator>,
    edges: Vec<LeadSourceOperator>,
    appeals: HashMap<i64, Appeal>,
    next_operator_id: i64,
    next_edge_id: i64,
    next_appeal_id: i64,
}

#[derive(Clone, Default)]
pub struct MemoryAllocationStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryAllocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an operator with zero active appeals. Returns its id.
    pub fn add_operator(&self, status: OperatorStatus, active_appeals_limit: i32) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_operator_id += 1;
        let id = state.next_operator_id;
        state.operators.insert(
            id,
            Operator {
                id,
                status,
                active_appeals: 0,
                active_appeals_limit,
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Seed a routing edge. Returns its id.
    pub fn link_source(&self, lead_source_id: i64, operator_id: i64, routing_factor: i64) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_edge_id += 1;
        let id = state.next_edge_id;
        state.edges.push(LeadSourceOperator {
            id,
            lead_source_id,
            operator_id,
            routing_factor,
            created_at: Utc::now(),
        });
        id
    }

    /// Overwrite an operator's ledger value directly (test setup).
    pub fn set_active_appeals(&self, operator_id: i64, active_appeals: i32) {
        let mut state = self.state.lock().unwrap();
        if let Some(operator) = state.operators.get_mut(&operator_id) {
            operator.active_appeals = active_appeals;
        }
    }

    /// Committed snapshot of an operator.
    pub fn operator(&self, operator_id: i64) -> Option<Operator> {
        self.state.lock().unwrap().operators.get(&operator_id).cloned()
    }

    /// Committed snapshot of an appeal.
    pub fn appeal(&self, appeal_id: i64) -> Option<Appeal> {
        self.state.lock().unwrap().appeals.get(&appeal_id).cloned()
    }
}

#[async_trait]
impl AllocationStore for MemoryAllocationStore {
    async fn begin(&self) -> Result<Box<dyn AllocationUow>, AppError> {
        let working = self.state.lock().unwrap().clone();
        Ok(Box::new(MemoryAllocationUow {
            shared: Arc::clone(&self.state),
            working,
        }))
    }
}

pub struct MemoryAllocationUow {
    shared: Arc<Mutex<MemoryState>>,
    working: MemoryState,
}

#[async_trait]
impl AllocationUow for MemoryAllocationUow {
    async fn appeal_by_id(&mut self, appeal_id: i64) -> Result<Option<Appeal>, AppError> {
        Ok(self.working.appeals.get(&appeal_id).cloned())
    }

    async fn routing_candidates(
        &mut self,
        lead_source_id: i64,
    ) -> Result<Vec<RoutingCandidate>, AppError> {
        let candidates = self
            .working
            .edges
            .iter()
            .filter(|edge| edge.lead_source_id == lead_source_id)
            .filter_map(|edge| {
                self.working
                    .operators
                    .get(&edge.operator_id)
                    .filter(|operator| operator.has_capacity())
                    .map(|_| RoutingCandidate {
                        operator_id: edge.operator_id,
                        routing_factor: edge.routing_factor,
                    })
            })
            .collect();

        Ok(candidates)
    }

    async fn create_appeal(
        &mut self,
        lead_id: i64,
        lead_source_id: i64,
    ) -> Result<Appeal, AppError> {
        self.working.next_appeal_id += 1;
        let appeal = Appeal {
            id: self.working.next_appeal_id,
            status: AppealStatus::Active,
            created_at: Utc::now(),
            lead_id,
            lead_source_id,
            assigned_operator_id: None,
        };
        self.working.appeals.insert(appeal.id, appeal.clone());
        Ok(appeal)
    }

    async fn set_assigned_operator(
        &mut self,
        appeal_id: i64,
        operator_id: i64,
    ) -> Result<(), AppError> {
        let appeal = self
            .working
            .appeals
            .get_mut(&appeal_id)
            .ok_or_else(|| AppError::NotFound(format!("appeal {}", appeal_id)))?;
        appeal.assigned_operator_id = Some(operator_id);
        Ok(())
    }

    async fn set_appeal_status(
        &mut self,
        appeal_id: i64,
        status: AppealStatus,
    ) -> Result<(), AppError> {
        let appeal = self
            .working
            .appeals
            .get_mut(&appeal_id)
            .ok_or_else(|| AppError::NotFound(format!("appeal {}", appeal_id)))?;
        appeal.status = status;
        Ok(())
    }

    async fn try_reserve_slot(&mut self, operator_id: i64) -> Result<bool, AppError> {
        let operator = self
            .working
            .operators
            .get_mut(&operator_id)
            .ok_or_else(|| AppError::NotFound(format!("operator {}", operator_id)))?;

        if !operator.has_capacity() {
            return Ok(false);
        }
        operator.active_appeals += 1;
        Ok(true)
    }

    async fn adjust_active_appeals(
        &mut self,
        operator_id: i64,
        delta: i32,
    ) -> Result<(), AppError> {
        let operator = self
            .working
            .operators
            .get_mut(&operator_id)
            .ok_or_else(|| AppError::NotFound(format!("operator {}", operator_id)))?;

        let next = operator.active_appeals + delta;
        if next < 0 {
            tracing::warn!(
                operator_id = operator_id,
                active_appeals = operator.active_appeals,
                delta = delta,
                "Ledger decrement below zero clamped"
            );
        }
        operator.active_appeals = next.max(0);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        *self.shared.lock().unwrap() = self.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}
