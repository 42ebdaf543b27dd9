//! The job store contract the worker engine runs against.
//!
//! Every cross-process coordination concern goes through this trait: claim,
//! heartbeat, requeue, fail, complete, plus the scans the reaper and batch
//! aggregator need. [`PgJobStore`] is the production implementation over the
//! repositories; tests substitute an in-memory store with the same
//! conditional-update semantics.

use std::time::Duration;

use async_trait::async_trait;
use muse_core::tool::QualityTier;
use muse_core::types::DbId;
use sqlx::PgPool;

use crate::models::batch::GenerationBatch;
use crate::models::generation::GenerationJob;
use crate::models::status::{BatchStatus, JobStatus, StatusId};
use crate::repositories::{BatchRepo, GenerationRepo};

/// Errors surfaced by job store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job not found: {0}")]
    JobNotFound(DbId),
}

/// Atomic persisted-state operations shared by all workers.
///
/// Implementations must treat every conditional update that matches zero
/// rows as "lost the race", not an error, and must never hand the same
/// claimed job to two callers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Claim up to `limit` jobs in `candidate` status: flip to the running
    /// status and stamp the lease in one atomic step.
    async fn claim(
        &self,
        candidate: JobStatus,
        worker_id: &str,
        limit: i64,
    ) -> Result<Vec<GenerationJob>, StoreError>;

    /// Refresh the lease; `false` means the lease was lost.
    async fn heartbeat(&self, job_id: DbId, worker_id: &str) -> Result<bool, StoreError>;

    /// Return a running job to its queue without consuming retry budget.
    async fn release(
        &self,
        job_id: DbId,
        worker_id: &str,
        quality: QualityTier,
    ) -> Result<(), StoreError>;

    /// Drop worker ownership but keep the heartbeat timestamp: the job is
    /// waiting on an out-of-band (webhook) completion, with the stale scan
    /// as its timeout fallback.
    async fn detach(&self, job_id: DbId, worker_id: &str) -> Result<(), StoreError>;

    /// Requeue after a retryable failure (increments `retry_count`).
    async fn requeue(
        &self,
        job_id: DbId,
        quality: QualityTier,
        reason: &str,
    ) -> Result<(), StoreError>;

    /// Terminal failure. Returns `false` when the job was no longer
    /// running (settled out-of-band), in which case nothing was written.
    async fn fail(&self, job_id: DbId, reason: &str) -> Result<bool, StoreError>;

    /// Record the artifact and move to the ready status. Returns `false`
    /// when the job was no longer running (completed out-of-band).
    async fn complete(
        &self,
        job_id: DbId,
        quality: QualityTier,
        result_url: &str,
        cost_cents: i64,
    ) -> Result<bool, StoreError>;

    /// Persist the vendor job id immediately after an async submission.
    async fn set_external_job_id(
        &self,
        job_id: DbId,
        external_job_id: &str,
    ) -> Result<(), StoreError>;

    /// Update vendor-reported progress (0-100). A no-op once the job is no
    /// longer running, so stale poll results cannot rewrite settled rows.
    async fn set_progress(&self, job_id: DbId, progress: i16) -> Result<(), StoreError>;

    async fn find_by_id(&self, job_id: DbId) -> Result<Option<GenerationJob>, StoreError>;

    /// Running jobs whose heartbeat is older than `older_than`.
    async fn stale_running(
        &self,
        older_than: Duration,
    ) -> Result<Vec<GenerationJob>, StoreError>;

    /// Batches whose aggregate status may still change.
    async fn unsettled_batches(&self) -> Result<Vec<GenerationBatch>, StoreError>;

    /// Status IDs of a batch's child jobs.
    async fn batch_child_statuses(&self, batch_id: DbId) -> Result<Vec<StatusId>, StoreError>;

    /// Store a recomputed aggregate batch status.
    async fn set_batch_status(
        &self,
        batch_id: DbId,
        status: BatchStatus,
    ) -> Result<(), StoreError>;
}

/// Production [`JobStore`] backed by Postgres.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn claim(
        &self,
        candidate: JobStatus,
        worker_id: &str,
        limit: i64,
    ) -> Result<Vec<GenerationJob>, StoreError> {
        Ok(GenerationRepo::claim(&self.pool, candidate, worker_id, limit).await?)
    }

    async fn heartbeat(&self, job_id: DbId, worker_id: &str) -> Result<bool, StoreError> {
        Ok(GenerationRepo::heartbeat(&self.pool, job_id, worker_id).await?)
    }

    async fn release(
        &self,
        job_id: DbId,
        worker_id: &str,
        quality: QualityTier,
    ) -> Result<(), StoreError> {
        Ok(GenerationRepo::release(&self.pool, job_id, worker_id, quality).await?)
    }

    async fn detach(&self, job_id: DbId, worker_id: &str) -> Result<(), StoreError> {
        Ok(GenerationRepo::detach(&self.pool, job_id, worker_id).await?)
    }

    async fn requeue(
        &self,
        job_id: DbId,
        quality: QualityTier,
        reason: &str,
    ) -> Result<(), StoreError> {
        Ok(GenerationRepo::requeue(&self.pool, job_id, quality, reason).await?)
    }

    async fn fail(&self, job_id: DbId, reason: &str) -> Result<bool, StoreError> {
        Ok(GenerationRepo::fail(&self.pool, job_id, reason).await?)
    }

    async fn complete(
        &self,
        job_id: DbId,
        quality: QualityTier,
        result_url: &str,
        cost_cents: i64,
    ) -> Result<bool, StoreError> {
        Ok(GenerationRepo::complete(&self.pool, job_id, quality, result_url, cost_cents).await?)
    }

    async fn set_external_job_id(
        &self,
        job_id: DbId,
        external_job_id: &str,
    ) -> Result<(), StoreError> {
        Ok(GenerationRepo::set_external_job_id(&self.pool, job_id, external_job_id).await?)
    }

    async fn set_progress(&self, job_id: DbId, progress: i16) -> Result<(), StoreError> {
        Ok(GenerationRepo::set_progress(&self.pool, job_id, progress).await?)
    }

    async fn find_by_id(&self, job_id: DbId) -> Result<Option<GenerationJob>, StoreError> {
        Ok(GenerationRepo::find_by_id(&self.pool, job_id).await?)
    }

    async fn stale_running(
        &self,
        older_than: Duration,
    ) -> Result<Vec<GenerationJob>, StoreError> {
        Ok(GenerationRepo::stale_running(&self.pool, older_than.as_secs() as i64).await?)
    }

    async fn unsettled_batches(&self) -> Result<Vec<GenerationBatch>, StoreError> {
        Ok(BatchRepo::unsettled(&self.pool).await?)
    }

    async fn batch_child_statuses(&self, batch_id: DbId) -> Result<Vec<StatusId>, StoreError> {
        Ok(BatchRepo::child_status_ids(&self.pool, batch_id).await?)
    }

    async fn set_batch_status(
        &self,
        batch_id: DbId,
        status: BatchStatus,
    ) -> Result<(), StoreError> {
        Ok(BatchRepo::set_status(&self.pool, batch_id, status).await?)
    }
}
