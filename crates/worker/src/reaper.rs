//! Stale-lease recovery.
//!
//! A worker that dies mid-job leaves the row in a running status with a
//! heartbeat that stops advancing. The reaper periodically sweeps those rows
//! and applies the same retry policy the engine would have: requeue while
//! budget remains, otherwise fail and refund. Jobs this process is itself
//! working on are skipped; their heartbeats are current by definition and
//! the in-flight set is the authoritative exclusion.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use muse_core::tool::QualityTier;
use muse_core::types::DbId;
use muse_db::store::{JobStore, StoreError};
use tracing::warn;

use crate::ledger::CreditLedger;

/// Heartbeat age past which a running job is considered orphaned. Twice the
/// renewal interval's worst case, so one missed heartbeat never reaps a
/// healthy job.
pub const STALE_AFTER: Duration = Duration::from_secs(120);

/// Sweeps orphaned running jobs back into circulation.
pub struct StaleLeaseReaper {
    store: Arc<dyn JobStore>,
    ledger: Arc<dyn CreditLedger>,
    in_flight: Arc<Mutex<HashSet<DbId>>>,
    stale_after: Duration,
}

impl StaleLeaseReaper {
    pub fn new(
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn CreditLedger>,
        in_flight: Arc<Mutex<HashSet<DbId>>>,
    ) -> Self {
        Self::with_threshold(store, ledger, in_flight, STALE_AFTER)
    }

    pub fn with_threshold(
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn CreditLedger>,
        in_flight: Arc<Mutex<HashSet<DbId>>>,
        stale_after: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            in_flight,
            stale_after,
        }
    }

    /// One sweep. Returns how many jobs were recovered.
    pub async fn run_once(&self) -> Result<usize, StoreError> {
        let stale = self.store.stale_running(self.stale_after).await?;
        let mut reaped = 0;

        for job in stale {
            let ours = self
                .in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&job.id);
            if ours {
                continue;
            }

            let quality = job.quality_tier().unwrap_or(QualityTier::Preview);
            if job.retry_count < job.max_retries {
                warn!(
                    job_id = job.id,
                    worker_id = job.worker_id.as_deref().unwrap_or("-"),
                    retry_count = job.retry_count,
                    "Reaping stale lease; requeueing"
                );
                self.store
                    .requeue(job.id, quality, "Lease expired; worker presumed dead")
                    .await?;
            } else {
                warn!(
                    job_id = job.id,
                    worker_id = job.worker_id.as_deref().unwrap_or("-"),
                    "Reaping stale lease; retry budget exhausted"
                );
                let failed = self
                    .store
                    .fail(job.id, "Lease expired and retry budget exhausted")
                    .await?;
                if !failed {
                    // Settled between the scan and the write; leave it be.
                    continue;
                }
                if job.reserved_cost_cents > 0 {
                    if let Err(e) = self
                        .ledger
                        .refund(job.workspace_id, job.reserved_cost_cents, job.id)
                        .await
                    {
                        warn!(
                            job_id = job.id,
                            error = %e,
                            "Refund for reaped job failed; needs out-of-band reconciliation"
                        );
                    }
                }
            }
            reaped += 1;
        }

        Ok(reaped)
    }
}
