//! Error types module
//!
//! All errors are unified under the `AppError` enum; routing-specific
//! conditions live in `RoutingError` so callers can match on them.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the
//! `sqlx` feature.

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Routing failure taxonomy.
///
/// `NoAvailableOperator` is transient and expected: every eligible operator
/// is saturated, inactive, or weighted to zero, and the allocation retries
/// after a fixed delay without bound. `AppealNotFound` is transient only up
/// to the visibility-retry bound; after that it is a producer bug or data
/// loss and becomes fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("no available operator for lead source {lead_source_id}")]
    NoAvailableOperator { lead_source_id: i64 },

    #[error("appeal {appeal_id} not found")]
    AppealNotFound { appeal_id: i64 },
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl AppError {
    /// Whether this error represents the transient "no operator has spare
    /// capacity" condition that drives the unbounded allocation retry.
    pub fn is_no_available_operator(&self) -> bool {
        matches!(
            self,
            AppError::Routing(RoutingError::NoAvailableOperator { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_errors_display_their_ids() {
        let err = RoutingError::NoAvailableOperator { lead_source_id: 3 };
        assert_eq!(err.to_string(), "no available operator for lead source 3");

        let err = RoutingError::AppealNotFound { appeal_id: 12 };
        assert_eq!(err.to_string(), "appeal 12 not found");
    }

    #[test]
    fn no_available_operator_is_detected_through_app_error() {
        let err: AppError = RoutingError::NoAvailableOperator { lead_source_id: 1 }.into();
        assert!(err.is_no_available_operator());

        let err: AppError = RoutingError::AppealNotFound { appeal_id: 1 }.into();
        assert!(!err.is_no_available_operator());

        assert!(!AppError::Internal("boom".into()).is_no_available_operator());
    }
}
