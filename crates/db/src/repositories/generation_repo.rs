//! Repository for the `generation_jobs` table.
//!
//! Concurrency control is optimistic: every lifecycle update is conditioned
//! on the current status (and, where a lease matters, the worker id). A
//! zero-rows-affected update means "lost the race", never an error. Claiming
//! additionally uses `FOR UPDATE SKIP LOCKED` so concurrent workers never
//! block each other on the same candidate rows.

use muse_core::tool::QualityTier;
use muse_core::types::DbId;
use sqlx::PgPool;

use crate::models::generation::{GenerationJob, SubmitGeneration};
use crate::models::status::JobStatus;

/// Column list for `generation_jobs` queries.
const COLUMNS: &str = "\
    id, workspace_id, batch_id, tool, provider_key, quality, params, \
    status_id, retry_count, max_retries, external_job_id, \
    worker_id, lease_heartbeat_at, cost_cents, reserved_cost_cents, \
    result_url, error_message, progress, \
    created_at, started_at, preview_completed_at, completed_at";

/// Default retry budget when a submission does not specify one.
const DEFAULT_MAX_RETRIES: i32 = 3;

/// Provides lifecycle operations for generation jobs.
pub struct GenerationRepo;

impl GenerationRepo {
    /// Queue a new job. Credits are assumed to have been debited already.
    pub async fn submit(
        pool: &PgPool,
        input: &SubmitGeneration,
    ) -> Result<GenerationJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO generation_jobs \
                 (workspace_id, batch_id, tool, provider_key, quality, params, \
                  status_id, max_retries, reserved_cost_cents) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        let status = match input.quality.as_str() {
            "final" => JobStatus::QueuedFinal,
            _ => JobStatus::Queued,
        };
        sqlx::query_as::<_, GenerationJob>(&query)
            .bind(input.workspace_id)
            .bind(input.batch_id)
            .bind(&input.tool)
            .bind(&input.provider_key)
            .bind(&input.quality)
            .bind(&input.params)
            .bind(status.id())
            .bind(input.max_retries.unwrap_or(DEFAULT_MAX_RETRIES))
            .bind(input.reserved_cost_cents)
            .fetch_one(pool)
            .await
    }

    /// Atomically claim up to `limit` jobs in `candidate` status for a worker.
    ///
    /// The status flip into the running state and the lease stamp happen in
    /// the same UPDATE, so there is no claim-then-update window. The inner
    /// `FOR UPDATE SKIP LOCKED` select prevents two workers from ever
    /// receiving the same row.
    pub async fn claim(
        pool: &PgPool,
        candidate: JobStatus,
        worker_id: &str,
        limit: i64,
    ) -> Result<Vec<GenerationJob>, sqlx::Error> {
        let running = match candidate {
            JobStatus::QueuedFinal => JobStatus::RunningFinal,
            _ => JobStatus::RunningPreview,
        };
        let query = format!(
            "UPDATE generation_jobs \
             SET status_id = $1, worker_id = $2, lease_heartbeat_at = NOW(), \
                 started_at = COALESCE(started_at, NOW()) \
             WHERE id IN ( \
                 SELECT id FROM generation_jobs \
                 WHERE status_id = $3 \
                 ORDER BY created_at ASC \
                 LIMIT $4 \
                 FOR UPDATE SKIP LOCKED \
             ) AND status_id = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationJob>(&query)
            .bind(running.id())
            .bind(worker_id)
            .bind(candidate.id())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Refresh the lease heartbeat. Returns `false` when the lease was lost
    /// (job requeued, reaped, or completed out-of-band).
    pub async fn heartbeat(
        pool: &PgPool,
        job_id: DbId,
        worker_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET lease_heartbeat_at = NOW() \
             WHERE id = $1 AND worker_id = $2 AND status_id IN ($3, $4)",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(JobStatus::RunningPreview.id())
        .bind(JobStatus::RunningFinal.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Put a running job back in its queued status without consuming any
    /// retry budget. Used when dispatch is refused (open circuit) or when
    /// completion is delegated to a webhook.
    pub async fn release(
        pool: &PgPool,
        job_id: DbId,
        worker_id: &str,
        quality: QualityTier,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE generation_jobs \
             SET status_id = $3, worker_id = NULL, lease_heartbeat_at = NULL \
             WHERE id = $1 AND worker_id = $2",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(JobStatus::queued_for(quality).id())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Drop worker ownership of a running job while keeping its heartbeat
    /// timestamp, leaving completion to the webhook collaborator. If the
    /// webhook never arrives, the job surfaces in the stale scan once the
    /// heartbeat ages out and the reaper applies the retry policy.
    pub async fn detach(
        pool: &PgPool,
        job_id: DbId,
        worker_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE generation_jobs \
             SET worker_id = NULL, lease_heartbeat_at = NOW() \
             WHERE id = $1 AND worker_id = $2",
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Requeue after a retryable failure: increments the retry count,
    /// records the error, and clears the lease.
    pub async fn requeue(
        pool: &PgPool,
        job_id: DbId,
        quality: QualityTier,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE generation_jobs \
             SET status_id = $2, retry_count = retry_count + 1, \
                 error_message = $3, progress = 0, \
                 worker_id = NULL, lease_heartbeat_at = NULL \
             WHERE id = $1 AND status_id IN ($4, $5)",
        )
        .bind(job_id)
        .bind(JobStatus::queued_for(quality).id())
        .bind(reason)
        .bind(JobStatus::RunningPreview.id())
        .bind(JobStatus::RunningFinal.id())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Terminal failure: records the message, stamps completion, and clears
    /// the lease. Returns `false` when the job was no longer running, so a
    /// completion that landed first is never clobbered (and never refunded).
    /// Refund handling is the engine's responsibility.
    pub async fn fail(pool: &PgPool, job_id: DbId, reason: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET status_id = $2, error_message = $3, completed_at = NOW(), \
                 worker_id = NULL, lease_heartbeat_at = NULL \
             WHERE id = $1 AND status_id IN ($4, $5)",
        )
        .bind(job_id)
        .bind(JobStatus::Failed.id())
        .bind(reason)
        .bind(JobStatus::RunningPreview.id())
        .bind(JobStatus::RunningFinal.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Store the artifact reference and move the job to its ready status.
    ///
    /// Conditioned on the job still being in a running state, so a
    /// completion delivered out-of-band (webhook) in the meantime is never
    /// overwritten. Returns `true` when this call performed the completion.
    pub async fn complete(
        pool: &PgPool,
        job_id: DbId,
        quality: QualityTier,
        result_url: &str,
        cost_cents: i64,
    ) -> Result<bool, sqlx::Error> {
        let tier_stamp = match quality {
            QualityTier::Preview => "preview_completed_at = NOW()",
            QualityTier::Final => "completed_at = NOW()",
        };
        let query = format!(
            "UPDATE generation_jobs \
             SET status_id = $2, result_url = $3, \
                 cost_cents = cost_cents + $4, progress = 100, \
                 {tier_stamp}, \
                 worker_id = NULL, lease_heartbeat_at = NULL, \
                 error_message = NULL \
             WHERE id = $1 AND status_id IN ($5, $6)"
        );
        let result = sqlx::query(&query)
            .bind(job_id)
            .bind(JobStatus::ready_for(quality).id())
            .bind(result_url)
            .bind(cost_cents)
            .bind(JobStatus::RunningPreview.id())
            .bind(JobStatus::RunningFinal.id())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persist the vendor's job identifier as soon as an async submission is
    /// accepted, so a crash after submission can resume without resubmitting.
    pub async fn set_external_job_id(
        pool: &PgPool,
        job_id: DbId,
        external_job_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE generation_jobs SET external_job_id = $2 WHERE id = $1")
            .bind(job_id)
            .bind(external_job_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Update the 0-100 progress figure reported by the vendor.
    ///
    /// Conditioned on the job still running, so a stale poll result never
    /// rewrites the progress of a row settled out-of-band.
    pub async fn set_progress(
        pool: &PgPool,
        job_id: DbId,
        progress: i16,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE generation_jobs SET progress = $2 \
             WHERE id = $1 AND status_id IN ($3, $4)",
        )
        .bind(job_id)
        .bind(progress.clamp(0, 100))
        .bind(JobStatus::RunningPreview.id())
        .bind(JobStatus::RunningFinal.id())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Cancel a job if it is still in a cancellable state (queued or
    /// preview-ready). Returns `true` if the job was cancelled.
    pub async fn cancel(pool: &PgPool, job_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET status_id = $2, completed_at = NOW() \
             WHERE id = $1 AND status_id IN ($3, $4)",
        )
        .bind(job_id)
        .bind(JobStatus::Cancelled.id())
        .bind(JobStatus::Queued.id())
        .bind(JobStatus::PreviewReady.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a job by its ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<GenerationJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generation_jobs WHERE id = $1");
        sqlx::query_as::<_, GenerationJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Jobs in a running status whose heartbeat is older than
    /// `older_than_secs`. A NULL heartbeat on a running job also counts as
    /// stale — the lease invariant was broken somewhere.
    pub async fn stale_running(
        pool: &PgPool,
        older_than_secs: i64,
    ) -> Result<Vec<GenerationJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_jobs \
             WHERE status_id IN ($1, $2) \
               AND (lease_heartbeat_at IS NULL \
                    OR lease_heartbeat_at < NOW() - $3 * INTERVAL '1 second') \
             ORDER BY lease_heartbeat_at ASC NULLS FIRST"
        );
        sqlx::query_as::<_, GenerationJob>(&query)
            .bind(JobStatus::RunningPreview.id())
            .bind(JobStatus::RunningFinal.id())
            .bind(older_than_secs)
            .fetch_all(pool)
            .await
    }
}
