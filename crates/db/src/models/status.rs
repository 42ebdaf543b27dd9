//! Status helper enums mapping to SMALLSERIAL/SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table, and must stay in sync
//! with the raw constants in `muse_core::lifecycle` / `muse_core::batch`.

use muse_core::tool::QualityTier;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Generation job lifecycle status.
    JobStatus {
        Queued = 1,
        RunningPreview = 2,
        PreviewReady = 3,
        QueuedFinal = 4,
        RunningFinal = 5,
        FinalReady = 6,
        Failed = 7,
        Cancelled = 8,
    }
}

define_status_enum! {
    /// Derived aggregate status of a generation batch.
    BatchStatus {
        Pending = 1,
        AllPreviewsReady = 2,
        Completed = 3,
        PartialFailure = 4,
    }
}

impl JobStatus {
    /// The claimable (queued) status for a quality tier.
    pub fn queued_for(quality: QualityTier) -> Self {
        match quality {
            QualityTier::Preview => JobStatus::Queued,
            QualityTier::Final => JobStatus::QueuedFinal,
        }
    }

    /// The leased (running) status a claim transitions into for a tier.
    pub fn running_for(quality: QualityTier) -> Self {
        match quality {
            QualityTier::Preview => JobStatus::RunningPreview,
            QualityTier::Final => JobStatus::RunningFinal,
        }
    }

    /// The artifact-ready status a completion transitions into for a tier.
    pub fn ready_for(quality: QualityTier) -> Self {
        match quality {
            QualityTier::Preview => JobStatus::PreviewReady,
            QualityTier::Final => JobStatus::FinalReady,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muse_core::{batch, lifecycle};

    #[test]
    fn job_status_ids_match_seed_data() {
        assert_eq!(JobStatus::Queued.id(), 1);
        assert_eq!(JobStatus::RunningPreview.id(), 2);
        assert_eq!(JobStatus::PreviewReady.id(), 3);
        assert_eq!(JobStatus::QueuedFinal.id(), 4);
        assert_eq!(JobStatus::RunningFinal.id(), 5);
        assert_eq!(JobStatus::FinalReady.id(), 6);
        assert_eq!(JobStatus::Failed.id(), 7);
        assert_eq!(JobStatus::Cancelled.id(), 8);
    }

    #[test]
    fn job_status_ids_match_core_lifecycle_constants() {
        assert_eq!(JobStatus::Queued.id(), lifecycle::QUEUED);
        assert_eq!(JobStatus::RunningPreview.id(), lifecycle::RUNNING_PREVIEW);
        assert_eq!(JobStatus::PreviewReady.id(), lifecycle::PREVIEW_READY);
        assert_eq!(JobStatus::QueuedFinal.id(), lifecycle::QUEUED_FINAL);
        assert_eq!(JobStatus::RunningFinal.id(), lifecycle::RUNNING_FINAL);
        assert_eq!(JobStatus::FinalReady.id(), lifecycle::FINAL_READY);
        assert_eq!(JobStatus::Failed.id(), lifecycle::FAILED);
        assert_eq!(JobStatus::Cancelled.id(), lifecycle::CANCELLED);
    }

    #[test]
    fn batch_status_ids_match_core_batch_constants() {
        assert_eq!(BatchStatus::Pending.id(), batch::BATCH_PENDING);
        assert_eq!(
            BatchStatus::AllPreviewsReady.id(),
            batch::BATCH_ALL_PREVIEWS_READY
        );
        assert_eq!(BatchStatus::Completed.id(), batch::BATCH_COMPLETED);
        assert_eq!(
            BatchStatus::PartialFailure.id(),
            batch::BATCH_PARTIAL_FAILURE
        );
    }

    #[test]
    fn tier_status_mapping() {
        assert_eq!(
            JobStatus::queued_for(QualityTier::Preview),
            JobStatus::Queued
        );
        assert_eq!(
            JobStatus::queued_for(QualityTier::Final),
            JobStatus::QueuedFinal
        );
        assert_eq!(
            JobStatus::running_for(QualityTier::Preview),
            JobStatus::RunningPreview
        );
        assert_eq!(
            JobStatus::running_for(QualityTier::Final),
            JobStatus::RunningFinal
        );
        assert_eq!(
            JobStatus::ready_for(QualityTier::Preview),
            JobStatus::PreviewReady
        );
        assert_eq!(
            JobStatus::ready_for(QualityTier::Final),
            JobStatus::FinalReady
        );
    }
}
