//! Generation batch entity model.

use muse_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::status::StatusId;

/// A row from the `generation_batches` table.
///
/// The status is derived: the aggregator recomputes it from the child jobs
/// and never treats the stored value as authoritative.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GenerationBatch {
    pub id: DbId,
    pub workspace_id: DbId,
    pub total_jobs: i32,
    pub status_id: StatusId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
