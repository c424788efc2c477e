//! Operator selector.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::SeedableRng;

use leadline_core::models::RoutingCandidate;
use leadline_core::routing::pick_weighted;
use leadline_core::{AppError, RoutingError};
use leadline_db::AllocationUow;

/// Picks an operator for a lead source via weighted-random sampling over
/// operators with spare capacity.
///
/// The returned candidate's capacity is a snapshot: by the time the caller
/// commits an assignment the operator may have filled up. That race is
/// resolved by the slot reservation at assignment time plus retry, not by
/// locking here.
pub struct AppealRoutingService {
    rng: Mutex<StdRng>,
}

impl AppealRoutingService {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Selector with a caller-provided RNG, for deterministic tests.
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Select one eligible operator for `lead_source_id`.
    ///
    /// Fails with `RoutingError::NoAvailableOperator` when no eligible
    /// candidate exists or every candidate has weight zero — a transient,
    /// retryable condition, not a permanent error.
    pub async fn select_operator(
        &self,
        uow: &mut dyn AllocationUow,
        lead_source_id: i64,
    ) -> Result<RoutingCandidate, AppError> {
        let candidates = uow.routing_candidates(lead_source_id).await?;

        let selected = {
            let mut rng = self.rng.lock().unwrap();
            pick_weighted(&candidates, &mut *rng).cloned()
        };

        match selected {
            Some(candidate) => {
                tracing::debug!(
                    lead_source_id = lead_source_id,
                    operator_id = candidate.operator_id,
                    candidates = candidates.len(),
                    "Operator selected"
                );
                Ok(candidate)
            }
            None => Err(RoutingError::NoAvailableOperator { lead_source_id }.into()),
        }
    }
}

impl Default for AppealRoutingService {
    fn default() -> Self {
        Self::new()
    }
}
