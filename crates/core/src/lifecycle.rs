//! Generation job lifecycle state machine.
//!
//! The status IDs here are intentionally duplicated from the `db` crate's
//! `JobStatus` enum because `core` must have zero internal deps. The IDs
//! match the 1-based seed order of the `job_statuses` lookup table.

/// Queued for the preview pass.
pub const QUEUED: i16 = 1;
/// Leased by a worker, preview pass in flight.
pub const RUNNING_PREVIEW: i16 = 2;
/// Preview artifact available; may be finalized or cancelled externally.
pub const PREVIEW_READY: i16 = 3;
/// Queued for the final pass after an external finalize action.
pub const QUEUED_FINAL: i16 = 4;
/// Leased by a worker, final pass in flight.
pub const RUNNING_FINAL: i16 = 5;
/// Final artifact available. Terminal.
pub const FINAL_READY: i16 = 6;
/// Permanently failed. Terminal, always carries an error message.
pub const FAILED: i16 = 7;
/// Cancelled externally before completion. Terminal.
pub const CANCELLED: i16 = 8;

/// Returns the set of valid target status IDs reachable from `from_status`.
///
/// No transition skips a `running_*` state, and `cancelled` is only
/// reachable from `queued` and `preview_ready`.
pub fn valid_transitions(from_status: i16) -> &'static [i16] {
    match from_status {
        // Queued -> claimed for preview, or cancelled externally
        QUEUED => &[RUNNING_PREVIEW, CANCELLED],
        // RunningPreview -> preview done, permanent failure, or retry requeue
        RUNNING_PREVIEW => &[PREVIEW_READY, FAILED, QUEUED],
        // PreviewReady -> finalize action, or cancelled externally
        PREVIEW_READY => &[QUEUED_FINAL, CANCELLED],
        // QueuedFinal -> claimed for final
        QUEUED_FINAL => &[RUNNING_FINAL],
        // RunningFinal -> final done, permanent failure, or retry requeue
        RUNNING_FINAL => &[FINAL_READY, FAILED, QUEUED_FINAL],
        // Terminal states
        FINAL_READY | FAILED | CANCELLED => &[],
        _ => &[],
    }
}

/// Check whether a transition from `from` to `to` is valid.
pub fn can_transition(from: i16, to: i16) -> bool {
    valid_transitions(from).contains(&to)
}

/// A job actively leased by a worker.
pub fn is_running(status: i16) -> bool {
    matches!(status, RUNNING_PREVIEW | RUNNING_FINAL)
}

/// A job the engine must never write a completion over: it has either
/// produced its artifact for the current tier or ended for good. Used as the
/// poll loop's out-of-band completion guard.
pub fn is_settled(status: i16) -> bool {
    matches!(status, PREVIEW_READY | FINAL_READY | FAILED | CANCELLED)
}

/// A job that can never change state again. Narrower than [`is_settled`]:
/// a preview-ready job is settled for the current tier but may still be
/// finalized or cancelled.
pub fn is_terminal(status: i16) -> bool {
    matches!(status, FINAL_READY | FAILED | CANCELLED)
}

/// A job that has reached at least the preview artifact.
pub fn reached_preview(status: i16) -> bool {
    matches!(
        status,
        PREVIEW_READY | QUEUED_FINAL | RUNNING_FINAL | FINAL_READY
    )
}

/// Human-readable name for a status ID (for error messages).
pub fn status_name(id: i16) -> &'static str {
    match id {
        QUEUED => "Queued",
        RUNNING_PREVIEW => "RunningPreview",
        PREVIEW_READY => "PreviewReady",
        QUEUED_FINAL => "QueuedFinal",
        RUNNING_FINAL => "RunningFinal",
        FINAL_READY => "FinalReady",
        FAILED => "Failed",
        CANCELLED => "Cancelled",
        _ => "Unknown",
    }
}
