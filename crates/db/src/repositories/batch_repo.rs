//! Repository for the `generation_batches` table.

use muse_core::types::DbId;
use sqlx::PgPool;

use crate::models::batch::GenerationBatch;
use crate::models::status::{BatchStatus, StatusId};

/// Column list for `generation_batches` queries.
const COLUMNS: &str = "id, workspace_id, total_jobs, status_id, created_at, updated_at";

/// Provides operations for generation batches.
pub struct BatchRepo;

impl BatchRepo {
    /// Create a new batch row for a multi-job submission.
    pub async fn create(
        pool: &PgPool,
        workspace_id: DbId,
        total_jobs: i32,
    ) -> Result<GenerationBatch, sqlx::Error> {
        let query = format!(
            "INSERT INTO generation_batches (workspace_id, total_jobs, status_id) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationBatch>(&query)
            .bind(workspace_id)
            .bind(total_jobs)
            .bind(BatchStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    /// Find a batch by its ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<GenerationBatch>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generation_batches WHERE id = $1");
        sqlx::query_as::<_, GenerationBatch>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Batches whose aggregate status may still change.
    pub async fn unsettled(pool: &PgPool) -> Result<Vec<GenerationBatch>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_batches \
             WHERE status_id IN ($1, $2) \
             ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, GenerationBatch>(&query)
            .bind(BatchStatus::Pending.id())
            .bind(BatchStatus::AllPreviewsReady.id())
            .fetch_all(pool)
            .await
    }

    /// Status IDs of all child jobs of a batch (read-only rollup input).
    pub async fn child_status_ids(
        pool: &PgPool,
        batch_id: DbId,
    ) -> Result<Vec<StatusId>, sqlx::Error> {
        sqlx::query_scalar::<_, StatusId>(
            "SELECT status_id FROM generation_jobs WHERE batch_id = $1",
        )
        .bind(batch_id)
        .fetch_all(pool)
        .await
    }

    /// Store a recomputed aggregate status.
    pub async fn set_status(
        pool: &PgPool,
        batch_id: DbId,
        status: BatchStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE generation_batches SET status_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(batch_id)
        .bind(status.id())
        .execute(pool)
        .await?;
        Ok(())
    }
}
