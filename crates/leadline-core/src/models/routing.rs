use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Routing edge: an operator eligible to receive appeals from a lead source,
/// with a relative weight. Many-to-many, keyed by the pair. Created and
/// maintained by admin CRUD; read-only to the routing core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadSourceOperator {
    pub id: i64,
    pub lead_source_id: i64,
    pub operator_id: i64,
    pub routing_factor: i64,
    pub created_at: DateTime<Utc>,
}

/// One eligible operator as seen by the selector: the routing edge joined
/// with its operator, pre-filtered to ACTIVE operators with spare capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingCandidate {
    pub operator_id: i64,
    pub routing_factor: i64,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for RoutingCandidate {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(RoutingCandidate {
            operator_id: row.get("operator_id"),
            routing_factor: row.get("routing_factor"),
        })
    }
}
