//! Repository for the credit ledger.
//!
//! The engine only ever touches the ledger through `refund`; debits happen
//! before a job is queued and belong to the submission flow, not the worker.

use muse_core::types::DbId;
use sqlx::PgPool;

/// Provides credit ledger operations.
pub struct LedgerRepo;

impl LedgerRepo {
    /// Record a refund transaction and credit the workspace balance in one
    /// database transaction.
    pub async fn refund(
        pool: &PgPool,
        workspace_id: DbId,
        amount_cents: i64,
        job_id: DbId,
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            "INSERT INTO credit_transactions (workspace_id, job_id, amount_cents, kind) \
             VALUES ($1, $2, $3, 'refund')",
        )
        .bind(workspace_id)
        .bind(job_id)
        .bind(amount_cents)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE workspaces \
             SET credit_balance_cents = credit_balance_cents + $2 \
             WHERE id = $1",
        )
        .bind(workspace_id)
        .bind(amount_cents)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }
}
