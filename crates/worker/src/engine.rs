//! Execution engine: drives one claimed job from dispatch to a settled or
//! requeued state.
//!
//! The engine owns the per-job control flow — circuit gating, adapter
//! dispatch, the sync/async path split, the poll loop, retry classification,
//! artifact persistence, and refunds. All persisted-state transitions go
//! through the [`JobStore`] so the same logic runs against Postgres in
//! production and an in-memory store in tests.

use std::sync::Arc;
use std::time::Duration;

use muse_core::circuit::CircuitRegistry;
use muse_core::lifecycle;
use muse_core::retry::{self, RetryDecision};
use muse_core::tool::QualityTier;
use muse_core::types::DbId;
use muse_db::models::generation::GenerationJob;
use muse_db::store::{JobStore, StoreError};
use muse_providers::adapter::{
    Artifact, FailureCode, GenerationOutcome, GenerationParams, GenerationRequest, PollOutcome,
    ProviderAdapter, ProviderFailure,
};
use muse_providers::http;
use muse_providers::registry::ProviderRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ledger::CreditLedger;
use crate::storage::ResultStore;

/// Engine timing knobs. Production uses [`Default`]; tests shrink them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the background lease renewal task heartbeats.
    pub lease_renew_interval: Duration,
    /// Delay between remote status polls on the async path.
    pub poll_interval: Duration,
    /// Total budget for the poll loop before the job is treated as a
    /// retryable vendor failure.
    pub poll_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lease_renew_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(15),
            poll_timeout: Duration::from_secs(600),
        }
    }
}

/// Processes claimed jobs. One instance per worker, shared across the
/// concurrent job tasks.
pub struct ExecutionEngine {
    store: Arc<dyn JobStore>,
    registry: Arc<ProviderRegistry>,
    circuits: Arc<CircuitRegistry>,
    results: Arc<dyn ResultStore>,
    ledger: Arc<dyn CreditLedger>,
    http: reqwest::Client,
    worker_id: String,
    config: EngineConfig,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<ProviderRegistry>,
        circuits: Arc<CircuitRegistry>,
        results: Arc<dyn ResultStore>,
        ledger: Arc<dyn CreditLedger>,
        worker_id: String,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            circuits,
            results,
            ledger,
            http: reqwest::Client::new(),
            worker_id,
            config,
        }
    }

    /// Drive one claimed job to a settled or requeued state.
    ///
    /// Never returns an error: vendor failures feed the retry policy, and
    /// store failures are logged and left to the stale-lease reaper, which
    /// will recover the job once its heartbeat ages out.
    pub async fn process(&self, job: GenerationJob) {
        let quality = match job.quality_tier() {
            Ok(q) => q,
            Err(e) => {
                error!(job_id = job.id, error = %e, "Job has an invalid quality tier");
                if let Err(e) = self.fail_permanently(&job, &format!("Invalid quality: {e}")).await
                {
                    error!(job_id = job.id, error = %e, "Failed to settle malformed job");
                }
                return;
            }
        };

        // Validation needs nothing from the vendor, so it runs before the
        // circuit gate. A malformed job reaching the gate would consume the
        // half-open probe without ever reporting back, wedging the circuit.
        let request = match self.build_request(&job, quality) {
            Ok(r) => r,
            Err(reason) => {
                if let Err(e) = self.fail_permanently(&job, &reason).await {
                    error!(job_id = job.id, error = %e, "Failed to settle malformed job");
                }
                return;
            }
        };

        // Circuit gate: refusal is not a failure, the job just goes back to
        // its queue for a later cycle (possibly on another worker).
        if !self.circuits.allows(&job.provider_key) {
            debug!(
                job_id = job.id,
                provider = %job.provider_key,
                "Circuit open; releasing job without dispatch"
            );
            if let Err(e) = self.store.release(job.id, &self.worker_id, quality).await {
                error!(job_id = job.id, error = %e, "Failed to release circuit-gated job");
            }
            return;
        }

        let Some(adapter) = self.registry.resolve(&job.provider_key) else {
            let failure = ProviderFailure::no_adapter(&job.provider_key);
            warn!(job_id = job.id, provider = %job.provider_key, "No adapter for provider");
            if let Err(e) = self.fail_permanently(&job, &failure.message).await {
                error!(job_id = job.id, error = %e, "Failed to settle adapterless job");
            }
            return;
        };

        let _renewal = self.spawn_lease_renewal(job.id);

        if let Err(e) = self.run(&job, quality, adapter, &request).await {
            error!(
                job_id = job.id,
                error = %e,
                "Store error while processing; leaving recovery to the reaper"
            );
        }
    }

    /// Parse and validate the job row into a dispatchable request.
    fn build_request(
        &self,
        job: &GenerationJob,
        quality: QualityTier,
    ) -> Result<GenerationRequest, String> {
        let tool = job.tool_type().map_err(|e| format!("Invalid tool: {e}"))?;
        let params: GenerationParams = serde_json::from_value(job.params.clone())
            .map_err(|e| format!("Unreadable job parameters: {e}"))?;
        if tool.requires_reference_media() && params.reference_urls.is_empty() {
            return Err(format!(
                "Tool '{}' requires reference media but none was provided",
                job.tool
            ));
        }
        Ok(GenerationRequest {
            job_id: job.id,
            tool,
            quality,
            params,
        })
    }

    async fn run(
        &self,
        job: &GenerationJob,
        quality: QualityTier,
        adapter: Arc<dyn ProviderAdapter>,
        request: &GenerationRequest,
    ) -> Result<(), StoreError> {
        let caps = adapter.capabilities();

        // Video-class work on a vendor that can report remote progress runs
        // asynchronously; everything else completes within the request.
        if (caps.supports_polling || caps.supports_webhooks) && request.tool.is_video_class() {
            self.run_async(job, quality, adapter, request).await
        } else {
            self.run_sync(job, quality, adapter, request).await
        }
    }

    // -----------------------------------------------------------------------
    // Sync path
    // -----------------------------------------------------------------------

    async fn run_sync(
        &self,
        job: &GenerationJob,
        quality: QualityTier,
        adapter: Arc<dyn ProviderAdapter>,
        request: &GenerationRequest,
    ) -> Result<(), StoreError> {
        info!(
            job_id = job.id,
            provider = %job.provider_key,
            tool = %job.tool,
            quality = quality.as_str(),
            "Dispatching synchronous generation"
        );
        match adapter.generate(request).await {
            GenerationOutcome::Completed(artifact) => {
                self.circuits.record_success(&job.provider_key);
                self.finish(job, quality, artifact, adapter.as_ref(), None)
                    .await
            }
            GenerationOutcome::Accepted { external_job_id } => {
                // The vendor answered, so the circuit records a success. The
                // job still fails: a sync-path adapter has no way to retrieve
                // an asynchronously accepted result, which is an adapter
                // capability defect rather than vendor health.
                self.circuits.record_success(&job.provider_key);
                self.store.set_external_job_id(job.id, &external_job_id).await?;
                let failure = ProviderFailure::unpollable_accept(&external_job_id);
                self.apply_retry_policy(job, quality, &failure, true).await
            }
            GenerationOutcome::Failed(failure) => {
                self.handle_vendor_failure(job, quality, failure, true).await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Async path
    // -----------------------------------------------------------------------

    async fn run_async(
        &self,
        job: &GenerationJob,
        quality: QualityTier,
        adapter: Arc<dyn ProviderAdapter>,
        request: &GenerationRequest,
    ) -> Result<(), StoreError> {
        // A surviving external id means a previous attempt already submitted;
        // resume polling instead of resubmitting (and double-billing).
        let external_job_id = match &job.external_job_id {
            Some(id) => {
                info!(
                    job_id = job.id,
                    external_job_id = %id,
                    "Resuming remote job from a previous attempt"
                );
                id.clone()
            }
            None => {
                info!(
                    job_id = job.id,
                    provider = %job.provider_key,
                    tool = %job.tool,
                    quality = quality.as_str(),
                    "Dispatching asynchronous generation"
                );
                match adapter.generate(request).await {
                    GenerationOutcome::Completed(artifact) => {
                        // Vendor finished inline despite the async path.
                        self.circuits.record_success(&job.provider_key);
                        return self
                            .finish(job, quality, artifact, adapter.as_ref(), None)
                            .await;
                    }
                    GenerationOutcome::Accepted { external_job_id } => {
                        self.circuits.record_success(&job.provider_key);
                        self.store
                            .set_external_job_id(job.id, &external_job_id)
                            .await?;
                        external_job_id
                    }
                    GenerationOutcome::Failed(failure) => {
                        return self.handle_vendor_failure(job, quality, failure, false).await;
                    }
                }
            }
        };

        let caps = adapter.capabilities();
        if !caps.supports_polling {
            // Webhook-only vendor: hand the lease back and let the webhook
            // collaborator complete the job. The stale scan is the timeout.
            info!(
                job_id = job.id,
                external_job_id = %external_job_id,
                "Detaching; completion is delegated to the vendor webhook"
            );
            return self.store.detach(job.id, &self.worker_id).await;
        }

        self.poll_until_complete(job, quality, adapter, &external_job_id)
            .await
    }

    async fn poll_until_complete(
        &self,
        job: &GenerationJob,
        quality: QualityTier,
        adapter: Arc<dyn ProviderAdapter>,
        external_job_id: &str,
    ) -> Result<(), StoreError> {
        let deadline = tokio::time::Instant::now() + self.config.poll_timeout;

        loop {
            if !self.store.heartbeat(job.id, &self.worker_id).await? {
                info!(job_id = job.id, "Lease lost while polling; abandoning remote watch");
                return Ok(());
            }

            // A webhook may have completed the job between polls; re-check
            // before acting so a stale poll result never overwrites it.
            match self.store.find_by_id(job.id).await? {
                None => return Err(StoreError::JobNotFound(job.id)),
                Some(current) if lifecycle::is_settled(current.status_id) => {
                    info!(
                        job_id = job.id,
                        status = lifecycle::status_name(current.status_id),
                        "Job settled out-of-band during polling"
                    );
                    return Ok(());
                }
                Some(_) => {}
            }

            match adapter.poll_status(external_job_id).await {
                PollOutcome::Processing { progress } => {
                    if let Some(p) = progress {
                        self.store.set_progress(job.id, p).await?;
                    }
                }
                PollOutcome::Completed { result_url } => {
                    // Async vendors report no cost figure at completion, so
                    // the reserved debit stands as the accrued cost.
                    let artifact = Artifact {
                        bytes: None,
                        url: result_url,
                        format: "mp4".into(),
                        cost_cents: job.reserved_cost_cents,
                        metadata: None,
                    };
                    return self
                        .finish(job, quality, artifact, adapter.as_ref(), Some(external_job_id))
                        .await;
                }
                PollOutcome::Failed(failure) => {
                    return self.handle_vendor_failure(job, quality, failure, false).await;
                }
            }

            if tokio::time::Instant::now() + self.config.poll_interval > deadline {
                warn!(
                    job_id = job.id,
                    external_job_id = %external_job_id,
                    "Remote job exceeded the poll budget"
                );
                return self
                    .handle_vendor_failure(job, quality, ProviderFailure::poll_timeout(), false)
                    .await;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    /// Sanity-check a lifecycle write against the transition table, using the
    /// claimed snapshot as the source state.
    fn assert_transition(job: &GenerationJob, to: i16) {
        debug_assert!(
            lifecycle::can_transition(job.status_id, to),
            "illegal status transition {} -> {} for job {}",
            lifecycle::status_name(job.status_id),
            lifecycle::status_name(to),
            job.id
        );
    }

    /// Materialize the artifact bytes, persist them, and record completion.
    async fn finish(
        &self,
        job: &GenerationJob,
        quality: QualityTier,
        artifact: Artifact,
        adapter: &dyn ProviderAdapter,
        external_job_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let bytes = match self.materialize(&artifact, adapter, external_job_id).await {
            Ok(b) => b,
            Err(failure) => return self.apply_retry_policy(job, quality, &failure, false).await,
        };

        let stored = self
            .results
            .store(job.id, &bytes, &artifact.format, quality)
            .await;
        let result_url = match stored {
            Ok(url) => url,
            Err(e) => {
                // Persistence failures are not vendor health; they bypass the
                // circuit and fail permanently for operator attention.
                let failure = ProviderFailure {
                    code: FailureCode::NoResult,
                    message: format!("Result persistence failed: {e}"),
                    retryable: false,
                };
                return self.apply_retry_policy(job, quality, &failure, false).await;
            }
        };

        Self::assert_transition(
            job,
            match quality {
                QualityTier::Preview => lifecycle::PREVIEW_READY,
                QualityTier::Final => lifecycle::FINAL_READY,
            },
        );
        let completed = self
            .store
            .complete(job.id, quality, &result_url, artifact.cost_cents)
            .await?;
        if completed {
            info!(
                job_id = job.id,
                quality = quality.as_str(),
                result_url = %result_url,
                cost_cents = artifact.cost_cents,
                "Generation completed"
            );
        } else {
            info!(
                job_id = job.id,
                "Completion already recorded out-of-band; keeping the existing result"
            );
        }
        Ok(())
    }

    /// Get the artifact's bytes: inline, via the adapter's authenticated
    /// download, or by plain HTTP fetch of the reported URL.
    async fn materialize(
        &self,
        artifact: &Artifact,
        adapter: &dyn ProviderAdapter,
        external_job_id: Option<&str>,
    ) -> Result<Vec<u8>, ProviderFailure> {
        if let Some(bytes) = &artifact.bytes {
            return Ok(bytes.clone());
        }
        if adapter.capabilities().supports_download {
            if let Some(external_id) = external_job_id {
                return adapter.download_result(external_id).await;
            }
        }
        match &artifact.url {
            Some(url) => http::fetch_bytes(&self.http, url).await,
            None => Err(ProviderFailure::no_result()),
        }
    }

    // -----------------------------------------------------------------------
    // Failure handling
    // -----------------------------------------------------------------------

    /// Record vendor health, then apply the retry policy.
    async fn handle_vendor_failure(
        &self,
        job: &GenerationJob,
        quality: QualityTier,
        failure: ProviderFailure,
        sync_path: bool,
    ) -> Result<(), StoreError> {
        self.circuits.record_failure(&job.provider_key);
        self.apply_retry_policy(job, quality, &failure, sync_path).await
    }

    /// Requeue with backoff or fail permanently, per the failure class and
    /// the job's remaining retry budget.
    async fn apply_retry_policy(
        &self,
        job: &GenerationJob,
        quality: QualityTier,
        failure: &ProviderFailure,
        sync_path: bool,
    ) -> Result<(), StoreError> {
        warn!(
            job_id = job.id,
            provider = %job.provider_key,
            code = failure.code.as_str(),
            retryable = failure.retryable,
            retry_count = job.retry_count,
            error = %failure.message,
            "Generation attempt failed"
        );
        match retry::decide(failure.retryable, job.retry_count, job.max_retries) {
            RetryDecision::Requeue => {
                Self::assert_transition(
                    job,
                    match quality {
                        QualityTier::Preview => lifecycle::QUEUED,
                        QualityTier::Final => lifecycle::QUEUED_FINAL,
                    },
                );
                self.store
                    .requeue(job.id, quality, &failure.message)
                    .await?;
                if sync_path {
                    // Hold this slot briefly so the newly requeued job is not
                    // hammered back against a struggling vendor. Async-path
                    // failures already spent their time in the poll loop.
                    tokio::time::sleep(retry::backoff_delay(job.retry_count + 1)).await;
                }
                Ok(())
            }
            RetryDecision::Fail => self.fail_permanently(job, &failure.message).await,
        }
    }

    /// Terminal failure plus the reserved-credit refund. Refund errors are
    /// logged and reconciled out-of-band.
    async fn fail_permanently(&self, job: &GenerationJob, reason: &str) -> Result<(), StoreError> {
        Self::assert_transition(job, lifecycle::FAILED);
        if !self.store.fail(job.id, reason).await? {
            // The job settled out-of-band first; its state stands.
            info!(job_id = job.id, "Job no longer running; skipping failure write");
            return Ok(());
        }
        warn!(job_id = job.id, error = %reason, "Job failed permanently");
        if job.reserved_cost_cents > 0 {
            if let Err(e) = self
                .ledger
                .refund(job.workspace_id, job.reserved_cost_cents, job.id)
                .await
            {
                warn!(
                    job_id = job.id,
                    workspace_id = job.workspace_id,
                    amount_cents = job.reserved_cost_cents,
                    error = %e,
                    "Refund failed; needs out-of-band reconciliation"
                );
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lease renewal
    // -----------------------------------------------------------------------

    /// Spawn a background task that heartbeats the lease until the returned
    /// guard is dropped.
    fn spawn_lease_renewal(&self, job_id: DbId) -> RenewalGuard {
        let token = CancellationToken::new();
        let child = token.clone();
        let store = Arc::clone(&self.store);
        let worker_id = self.worker_id.clone();
        let period = self.config.lease_renew_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        match store.heartbeat(job_id, &worker_id).await {
                            Ok(true) => {}
                            Ok(false) => {
                                debug!(job_id, "Lease no longer held; stopping renewal");
                                break;
                            }
                            Err(e) => {
                                warn!(job_id, error = %e, "Lease renewal heartbeat failed");
                            }
                        }
                    }
                }
            }
        });

        RenewalGuard { token }
    }
}

/// Cancels the lease renewal task on drop.
struct RenewalGuard {
    token: CancellationToken,
}

impl Drop for RenewalGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
