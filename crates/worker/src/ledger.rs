//! Credit refund seam.
//!
//! The engine refunds the reserved debit when a job fails permanently.
//! Refunds are fire-and-forget from the engine's point of view: a failed
//! refund is logged and reconciled out-of-band, never allowed to block the
//! job's own terminal transition.

use async_trait::async_trait;
use muse_core::types::DbId;
use muse_db::repositories::LedgerRepo;
use sqlx::PgPool;

/// Errors raised by ledger implementations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Workspace credit operations the worker needs.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Return `amount_cents` to the workspace balance, referencing the
    /// failed job.
    async fn refund(
        &self,
        workspace_id: DbId,
        amount_cents: i64,
        job_id: DbId,
    ) -> Result<(), LedgerError>;
}

/// Production [`CreditLedger`] over the Postgres credit tables.
pub struct PgCreditLedger {
    pool: PgPool,
}

impl PgCreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditLedger for PgCreditLedger {
    async fn refund(
        &self,
        workspace_id: DbId,
        amount_cents: i64,
        job_id: DbId,
    ) -> Result<(), LedgerError> {
        LedgerRepo::refund(&self.pool, workspace_id, amount_cents, job_id).await?;
        Ok(())
    }
}
