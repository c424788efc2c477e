use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorStatus {
    Active,
    Inactive,
}

impl Display for OperatorStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            OperatorStatus::Active => write!(f, "ACTIVE"),
            OperatorStatus::Inactive => write!(f, "INACTIVE"),
        }
    }
}

impl FromStr for OperatorStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(OperatorStatus::Active),
            "INACTIVE" => Ok(OperatorStatus::Inactive),
            _ => Err(anyhow::anyhow!("Invalid operator status: {}", s)),
        }
    }
}

/// A human agent with a limit on concurrently active appeals.
///
/// `active_appeals` is the capacity ledger: it must equal the number of
/// ACTIVE appeals currently assigned to this operator after every committed
/// transition. It is mutated only by the appeal state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: i64,
    pub status: OperatorStatus,
    pub active_appeals: i32,
    pub active_appeals_limit: i32,
    pub created_at: DateTime<Utc>,
}

impl Operator {
    /// Whether this operator may receive one more appeal right now.
    pub fn has_capacity(&self) -> bool {
        self.status == OperatorStatus::Active && self.active_appeals < self.active_appeals_limit
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Operator {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Operator {
            id: row.get("id"),
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse operator status: {}", e).into())
            })?,
            active_appeals: row.get("active_appeals"),
            active_appeals_limit: row.get("active_appeals_limit"),
            created_at: row.get("created_at"),
        })
    }
}
