//! Batch status aggregation.
//!
//! A batch's status is derived from its children, never written on the hot
//! path: every worker recomputes the same pure rollup from the same child
//! rows, so concurrent aggregation passes converge on the same value and
//! ordering between them does not matter.

use std::sync::Arc;

use muse_core::batch;
use muse_db::models::status::BatchStatus;
use muse_db::store::{JobStore, StoreError};
use tracing::info;

/// Recomputes aggregate batch statuses from child job statuses.
pub struct BatchAggregator {
    store: Arc<dyn JobStore>,
}

impl BatchAggregator {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// One pass over all unsettled batches. Returns how many changed.
    pub async fn run_once(&self) -> Result<usize, StoreError> {
        let mut updated = 0;

        for batch_row in self.store.unsettled_batches().await? {
            let children = self.store.batch_child_statuses(batch_row.id).await?;
            let Some(next) = batch::rollup(&children) else {
                continue;
            };
            if next == batch_row.status_id {
                continue;
            }
            let status = match next {
                batch::BATCH_ALL_PREVIEWS_READY => BatchStatus::AllPreviewsReady,
                batch::BATCH_COMPLETED => BatchStatus::Completed,
                batch::BATCH_PARTIAL_FAILURE => BatchStatus::PartialFailure,
                _ => continue,
            };
            self.store.set_batch_status(batch_row.id, status).await?;
            info!(
                batch_id = batch_row.id,
                status = ?status,
                children = children.len(),
                "Batch status advanced"
            );
            updated += 1;
        }

        Ok(updated)
    }
}
