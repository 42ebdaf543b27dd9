//! Batch status rollup.
//!
//! A batch's aggregate status is derived, never authoritative: it is always
//! recomputed from the child jobs' statuses, and recomputing with unchanged
//! children yields the same result.

use crate::lifecycle;

/// Batch status IDs, duplicated from the `db` crate's `BatchStatus` enum
/// (1-based seed order of the `batch_statuses` lookup table).
pub const BATCH_PENDING: i16 = 1;
pub const BATCH_ALL_PREVIEWS_READY: i16 = 2;
pub const BATCH_COMPLETED: i16 = 3;
pub const BATCH_PARTIAL_FAILURE: i16 = 4;

/// Whether a batch status needs no further recomputation.
pub fn is_batch_settled(status: i16) -> bool {
    matches!(status, BATCH_COMPLETED | BATCH_PARTIAL_FAILURE)
}

/// Recompute a batch's aggregate status from its children's job statuses.
///
/// - `Completed` when every child is terminal and none failed.
/// - `PartialFailure` when every child is terminal and at least one failed.
/// - `AllPreviewsReady` when every child has reached at least a preview
///   artifact but some are still moving toward final.
/// - `None` (leave unchanged) otherwise.
pub fn rollup(children: &[i16]) -> Option<i16> {
    if children.is_empty() {
        return None;
    }

    if children.iter().all(|&s| lifecycle::is_terminal(s)) {
        let any_failed = children.iter().any(|&s| s == lifecycle::FAILED);
        return Some(if any_failed {
            BATCH_PARTIAL_FAILURE
        } else {
            BATCH_COMPLETED
        });
    }

    if children.iter().all(|&s| lifecycle::reached_preview(s)) {
        return Some(BATCH_ALL_PREVIEWS_READY);
    }

    None
}
