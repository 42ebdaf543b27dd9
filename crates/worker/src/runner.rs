//! The worker main loop.
//!
//! Every tick: touch the liveness file, run maintenance on its cadence,
//! then claim as many queued jobs as free slots allow and hand each to the
//! engine on its own task. Preview work is claimed before final-pass work
//! so new submissions get first feedback quickly. Shutdown cancels claiming
//! immediately and drains in-flight jobs up to the configured grace period;
//! anything still running after that is abandoned to the stale-lease
//! reaper.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use muse_core::tool::QualityTier;
use muse_core::types::DbId;
use muse_db::models::status::JobStatus;
use muse_db::store::{JobStore, StoreError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::BatchAggregator;
use crate::config::WorkerConfig;
use crate::engine::ExecutionEngine;
use crate::ledger::CreditLedger;
use crate::liveness;
use crate::reaper::StaleLeaseReaper;

/// Owns the claim/dispatch loop and the maintenance cadence.
pub struct WorkerLoop {
    store: Arc<dyn JobStore>,
    engine: Arc<ExecutionEngine>,
    reaper: StaleLeaseReaper,
    aggregator: BatchAggregator,
    config: WorkerConfig,
    in_flight: Arc<Mutex<HashSet<DbId>>>,
    slots: Arc<Semaphore>,
}

impl WorkerLoop {
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<ExecutionEngine>,
        ledger: Arc<dyn CreditLedger>,
        config: WorkerConfig,
    ) -> Self {
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        Self {
            reaper: StaleLeaseReaper::new(
                Arc::clone(&store),
                ledger,
                Arc::clone(&in_flight),
            ),
            aggregator: BatchAggregator::new(Arc::clone(&store)),
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            store,
            engine,
            config,
            in_flight,
        }
    }

    /// Run until `shutdown` is cancelled, then drain.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.config.worker_id,
            max_concurrent = self.config.max_concurrent,
            "Worker loop started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        let mut tasks: JoinSet<DbId> = JoinSet::new();
        let mut cycle: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    cycle += 1;
                    while let Some(joined) = tasks.try_join_next() {
                        if let Err(e) = joined {
                            error!(error = %e, "Job task panicked");
                        }
                    }

                    if let Err(e) = liveness::touch(&self.config.liveness_file).await {
                        warn!(error = %e, "Failed to touch liveness file");
                    }

                    if cycle % self.config.maintenance_every == 0 {
                        self.run_maintenance().await;
                    }

                    if let Err(e) = self.dispatch_cycle(&mut tasks).await {
                        error!(error = %e, "Claim cycle failed");
                    }
                }
            }
        }

        self.drain(tasks).await;
    }

    async fn run_maintenance(&self) {
        match self.reaper.run_once().await {
            Ok(n) if n > 0 => info!(reaped = n, "Recovered stale leases"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Stale-lease sweep failed"),
        }
        match self.aggregator.run_once().await {
            Ok(n) if n > 0 => debug!(updated = n, "Batch statuses advanced"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Batch aggregation failed"),
        }
    }

    /// Claim up to the free slot count, previews first, and spawn a task
    /// per claimed job.
    async fn dispatch_cycle(&self, tasks: &mut JoinSet<DbId>) -> Result<(), StoreError> {
        let free = self.slots.available_permits();
        if free == 0 {
            return Ok(());
        }

        let mut claimed = self
            .store
            .claim(JobStatus::Queued, &self.config.worker_id, free as i64)
            .await?;
        let remaining = free - claimed.len();
        if remaining > 0 {
            claimed.extend(
                self.store
                    .claim(
                        JobStatus::QueuedFinal,
                        &self.config.worker_id,
                        remaining as i64,
                    )
                    .await?,
            );
        }

        for job in claimed {
            // The claim count was bounded by the free permits, so this
            // acquisition cannot fail while this loop is the only claimer.
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                warn!(job_id = job.id, "No slot for claimed job; releasing");
                let quality = job.quality_tier().unwrap_or(QualityTier::Preview);
                self.store
                    .release(job.id, &self.config.worker_id, quality)
                    .await?;
                continue;
            };

            debug!(job_id = job.id, provider = %job.provider_key, "Claimed job");
            let tracked = InFlightGuard::track(&self.in_flight, job.id);

            let engine = Arc::clone(&self.engine);
            tasks.spawn(async move {
                let _slot = permit;
                let _tracked = tracked;
                let job_id = job.id;
                engine.process(job).await;
                job_id
            });
        }

        Ok(())
    }

    /// Wait for in-flight jobs up to the drain timeout, then abandon the
    /// rest; their leases will go stale and the reaper requeues them.
    async fn drain(&self, mut tasks: JoinSet<DbId>) {
        if tasks.is_empty() {
            info!("Worker loop stopped; no jobs in flight");
            return;
        }
        info!(in_flight = tasks.len(), "Draining in-flight jobs");
        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        match drained {
            Ok(()) => info!("All in-flight jobs drained"),
            Err(_) => {
                warn!(
                    abandoned = tasks.len(),
                    "Drain deadline passed; abandoning remaining jobs to the stale-lease sweep"
                );
                tasks.abort_all();
            }
        }
    }
}

/// Membership in the in-flight set, released on drop so a panicking or
/// aborted job task cannot leave its id pinned against the stale-lease sweep.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<DbId>>>,
    job_id: DbId,
}

impl InFlightGuard {
    fn track(set: &Arc<Mutex<HashSet<DbId>>>, job_id: DbId) -> Self {
        set.lock().unwrap_or_else(|e| e.into_inner()).insert(job_id);
        Self {
            set: Arc::clone(set),
            job_id,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}
