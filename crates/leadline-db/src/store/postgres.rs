//! PostgreSQL implementation of the allocation store.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use leadline_core::models::{Appeal, AppealStatus, RoutingCandidate};
use leadline_core::AppError;

use super::{AllocationStore, AllocationUow};

const APPEAL_COLUMNS: &str = r#"
    id,
    status,
    created_at,
    lead_id,
    lead_source_id,
    assigned_operator_id
"#;

#[derive(Clone)]
pub struct PgAllocationStore {
    pool: PgPool,
}

impl PgAllocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AllocationStore for PgAllocationStore {
    async fn begin(&self) -> Result<Box<dyn AllocationUow>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgAllocationUow { tx }))
    }
}

/// One database transaction. Writes are flushed to the transaction as they
/// happen and become durable only on `commit`.
pub struct PgAllocationUow {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AllocationUow for PgAllocationUow {
    async fn appeal_by_id(&mut self, appeal_id: i64) -> Result<Option<Appeal>, AppError> {
        let appeal = sqlx::query_as::<Postgres, Appeal>(&format!(
            r#"
            SELECT {APPEAL_COLUMNS}
            FROM appeal
            WHERE id = $1
            "#,
        ))
        .bind(appeal_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(appeal)
    }

    async fn routing_candidates(
        &mut self,
        lead_source_id: i64,
    ) -> Result<Vec<RoutingCandidate>, AppError> {
        let candidates = sqlx::query_as::<Postgres, RoutingCandidate>(
            r#"
            SELECT lso.operator_id, lso.routing_factor
            FROM lead_source_operator lso
            JOIN operator o ON o.id = lso.operator_id
            WHERE lso.lead_source_id = $1
                AND o.status = 'ACTIVE'
                AND o.active_appeals < o.active_appeals_limit
            ORDER BY lso.id
            "#,
        )
        .bind(lead_source_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(candidates)
    }

    async fn create_appeal(
        &mut self,
        lead_id: i64,
        lead_source_id: i64,
    ) -> Result<Appeal, AppError> {
        let appeal = sqlx::query_as::<Postgres, Appeal>(&format!(
            r#"
            INSERT INTO appeal (status, lead_id, lead_source_id)
            VALUES ('ACTIVE', $1, $2)
            RETURNING {APPEAL_COLUMNS}
            "#,
        ))
        .bind(lead_id)
        .bind(lead_source_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(appeal)
    }

    async fn set_assigned_operator(
        &mut self,
        appeal_id: i64,
        operator_id: i64,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE appeal SET assigned_operator_id = $2 WHERE id = $1")
            .bind(appeal_id)
            .bind(operator_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn set_appeal_status(
        &mut self,
        appeal_id: i64,
        status: AppealStatus,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE appeal SET status = $2 WHERE id = $1")
            .bind(appeal_id)
            .bind(status.to_string())
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn try_reserve_slot(&mut self, operator_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE operator
            SET active_appeals = active_appeals + 1
            WHERE id = $1
                AND status = 'ACTIVE'
                AND active_appeals < active_appeals_limit
            "#,
        )
        .bind(operator_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn adjust_active_appeals(
        &mut self,
        operator_id: i64,
        delta: i32,
    ) -> Result<(), AppError> {
        let current: Option<i32> =
            sqlx::query_scalar("SELECT active_appeals FROM operator WHERE id = $1 FOR UPDATE")
                .bind(operator_id)
                .fetch_optional(&mut *self.tx)
                .await?;

        let Some(current) = current else {
            return Err(AppError::NotFound(format!("operator {}", operator_id)));
        };

        let next = current + delta;
        if next < 0 {
            tracing::warn!(
                operator_id = operator_id,
                active_appeals = current,
                delta = delta,
                "Ledger decrement below zero clamped"
            );
        }

        sqlx::query("UPDATE operator SET active_appeals = $2 WHERE id = $1")
            .bind(operator_id)
            .bind(next.max(0))
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
