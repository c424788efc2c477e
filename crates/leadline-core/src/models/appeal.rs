use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppealStatus {
    Active,
    Resolved,
}

impl Display for AppealStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AppealStatus::Active => write!(f, "ACTIVE"),
            AppealStatus::Resolved => write!(f, "RESOLVED"),
        }
    }
}

impl FromStr for AppealStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(AppealStatus::Active),
            "RESOLVED" => Ok(AppealStatus::Resolved),
            _ => Err(anyhow::anyhow!("Invalid appeal status: {}", s)),
        }
    }
}

/// A customer contact that must be routed to exactly one operator.
///
/// Created with `assigned_operator_id = NULL`; the allocation worker is the
/// sole writer that sets it the first time. Resolution is reversible, so
/// there is no terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appeal {
    pub id: i64,
    pub status: AppealStatus,
    pub created_at: DateTime<Utc>,
    pub lead_id: i64,
    pub lead_source_id: i64,
    pub assigned_operator_id: Option<i64>,
}

impl Appeal {
    pub fn is_assigned(&self) -> bool {
        self.assigned_operator_id.is_some()
    }

    /// Whether this appeal currently holds one of its operator's capacity
    /// slots.
    pub fn occupies_slot(&self) -> bool {
        self.status == AppealStatus::Active && self.is_assigned()
    }
}

/// Ledger adjustment for an **assigned** appeal moving between statuses.
///
/// ACTIVE -> RESOLVED frees exactly one slot, RESOLVED -> ACTIVE re-consumes
/// exactly one slot, and a same-status transition never touches the ledger.
pub fn slot_delta(old: AppealStatus, new: AppealStatus) -> i32 {
    match (old, new) {
        (AppealStatus::Active, AppealStatus::Resolved) => -1,
        (AppealStatus::Resolved, AppealStatus::Active) => 1,
        _ => 0,
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Appeal {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Appeal {
            id: row.get("id"),
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse appeal status: {}", e).into())
            })?,
            created_at: row.get("created_at"),
            lead_id: row.get("lead_id"),
            lead_source_id: row.get("lead_source_id"),
            assigned_operator_id: row.get("assigned_operator_id"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appeal(status: AppealStatus, assigned: Option<i64>) -> Appeal {
        Appeal {
            id: 1,
            status,
            created_at: Utc::now(),
            lead_id: 1,
            lead_source_id: 1,
            assigned_operator_id: assigned,
        }
    }

    #[test]
    fn status_round_trip() {
        assert_eq!(AppealStatus::Active.to_string(), "ACTIVE");
        assert_eq!(AppealStatus::Resolved.to_string(), "RESOLVED");
        assert_eq!(
            "ACTIVE".parse::<AppealStatus>().unwrap(),
            AppealStatus::Active
        );
        assert_eq!(
            "RESOLVED".parse::<AppealStatus>().unwrap(),
            AppealStatus::Resolved
        );
        assert!("resolved".parse::<AppealStatus>().is_err());
    }

    #[test]
    fn occupies_slot_only_when_active_and_assigned() {
        assert!(appeal(AppealStatus::Active, Some(7)).occupies_slot());
        assert!(!appeal(AppealStatus::Active, None).occupies_slot());
        assert!(!appeal(AppealStatus::Resolved, Some(7)).occupies_slot());
        assert!(!appeal(AppealStatus::Resolved, None).occupies_slot());
    }

    #[test]
    fn resolving_frees_one_slot() {
        assert_eq!(slot_delta(AppealStatus::Active, AppealStatus::Resolved), -1);
    }

    #[test]
    fn reactivating_consumes_one_slot() {
        assert_eq!(slot_delta(AppealStatus::Resolved, AppealStatus::Active), 1);
    }

    #[test]
    fn same_status_never_touches_ledger() {
        assert_eq!(slot_delta(AppealStatus::Active, AppealStatus::Active), 0);
        assert_eq!(slot_delta(AppealStatus::Resolved, AppealStatus::Resolved), 0);
    }

    #[test]
    fn round_trip_is_neutral() {
        let down = slot_delta(AppealStatus::Active, AppealStatus::Resolved);
        let up = slot_delta(AppealStatus::Resolved, AppealStatus::Active);
        assert_eq!(down + up, 0);
    }
}
