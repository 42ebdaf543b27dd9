//! Generation job entity model and DTOs.

use muse_core::error::CoreError;
use muse_core::tool::{QualityTier, ToolType};
use muse_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::StatusId;

/// A row from the `generation_jobs` table.
///
/// The lease is the pair (`worker_id`, `lease_heartbeat_at`): a job with a
/// stale heartbeat is considered unleased regardless of `worker_id`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GenerationJob {
    pub id: DbId,
    pub workspace_id: DbId,
    pub batch_id: Option<DbId>,
    pub tool: String,
    pub provider_key: String,
    pub quality: String,
    pub params: serde_json::Value,
    pub status_id: StatusId,
    pub retry_count: i32,
    pub max_retries: i32,
    /// The vendor's own job identifier; set only by asynchronous providers.
    pub external_job_id: Option<String>,
    pub worker_id: Option<String>,
    pub lease_heartbeat_at: Option<Timestamp>,
    /// Accumulated vendor cost across completed passes, in cents.
    pub cost_cents: i64,
    /// Amount debited at submission for the currently pending tier; this is
    /// what gets refunded on permanent failure.
    pub reserved_cost_cents: i64,
    pub result_url: Option<String>,
    pub error_message: Option<String>,
    pub progress: i16,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub preview_completed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl GenerationJob {
    /// Parse the stored tool type string.
    pub fn tool_type(&self) -> Result<ToolType, CoreError> {
        ToolType::parse(&self.tool)
    }

    /// Parse the stored quality tier string.
    pub fn quality_tier(&self) -> Result<QualityTier, CoreError> {
        QualityTier::parse(&self.quality)
    }
}

/// DTO for queueing a new generation job.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitGeneration {
    pub workspace_id: DbId,
    pub batch_id: Option<DbId>,
    pub tool: String,
    pub provider_key: String,
    pub quality: String,
    pub params: serde_json::Value,
    pub max_retries: Option<i32>,
    /// The credit debit already applied for this submission.
    pub reserved_cost_cents: i64,
}
