//! Shared test doubles: an in-memory job store with the production
//! conditional-update semantics, a scriptable provider adapter, and
//! recording implementations of the storage and ledger seams.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use muse_core::circuit::CircuitRegistry;
use muse_core::tool::QualityTier;
use muse_core::types::DbId;
use muse_db::models::batch::GenerationBatch;
use muse_db::models::generation::GenerationJob;
use muse_db::models::status::{BatchStatus, JobStatus, StatusId};
use muse_db::store::{JobStore, StoreError};
use muse_providers::adapter::{
    GenerationOutcome, GenerationRequest, PollOutcome, ProviderAdapter, ProviderCapabilities,
    ProviderFailure,
};
use muse_providers::registry::ProviderRegistry;
use muse_worker::engine::{EngineConfig, ExecutionEngine};
use muse_worker::ledger::{CreditLedger, LedgerError};
use muse_worker::storage::{ResultStore, StorageError};

pub const WORKER: &str = "worker-test";

// ---------------------------------------------------------------------------
// In-memory job store
// ---------------------------------------------------------------------------

/// [`JobStore`] over a `HashMap`, preserving the conditional-update rules:
/// lifecycle writes only apply when the row is in the expected state, and
/// zero matches means "lost the race", never an error.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<DbId, GenerationJob>>,
    batches: Mutex<HashMap<DbId, GenerationBatch>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_job(&self, job: GenerationJob) {
        self.jobs.lock().unwrap().insert(job.id, job);
    }

    pub fn insert_batch(&self, batch: GenerationBatch) {
        self.batches.lock().unwrap().insert(batch.id, batch);
    }

    pub fn job(&self, id: DbId) -> GenerationJob {
        self.jobs.lock().unwrap().get(&id).expect("job exists").clone()
    }

    pub fn batch(&self, id: DbId) -> GenerationBatch {
        self.batches
            .lock()
            .unwrap()
            .get(&id)
            .expect("batch exists")
            .clone()
    }

    /// Out-of-band write, simulating a webhook or another worker.
    pub fn force_status(&self, id: DbId, status: JobStatus, result_url: Option<&str>) {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).expect("job exists");
        job.status_id = status.id();
        if let Some(url) = result_url {
            job.result_url = Some(url.to_string());
            job.progress = 100;
        }
        job.worker_id = None;
        job.lease_heartbeat_at = None;
    }

    /// Backdate the lease heartbeat, simulating a dead worker.
    pub fn age_heartbeat(&self, id: DbId, by: Duration) {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).expect("job exists");
        job.lease_heartbeat_at =
            Some(Utc::now() - chrono::Duration::from_std(by).expect("duration fits"));
    }

    fn is_running(status_id: StatusId) -> bool {
        status_id == JobStatus::RunningPreview.id() || status_id == JobStatus::RunningFinal.id()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn claim(
        &self,
        candidate: JobStatus,
        worker_id: &str,
        limit: i64,
    ) -> Result<Vec<GenerationJob>, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut ids: Vec<DbId> = jobs
            .values()
            .filter(|j| j.status_id == candidate.id())
            .map(|j| j.id)
            .collect();
        ids.sort_unstable();
        ids.truncate(limit.max(0) as usize);

        let running = match candidate {
            JobStatus::QueuedFinal => JobStatus::RunningFinal,
            _ => JobStatus::RunningPreview,
        };
        let mut claimed = Vec::new();
        for id in ids {
            let job = jobs.get_mut(&id).expect("job exists");
            job.status_id = running.id();
            job.worker_id = Some(worker_id.to_string());
            job.lease_heartbeat_at = Some(Utc::now());
            job.started_at.get_or_insert_with(Utc::now);
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn heartbeat(&self, job_id: DbId, worker_id: &str) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&job_id) {
            Some(job)
                if job.worker_id.as_deref() == Some(worker_id)
                    && Self::is_running(job.status_id) =>
            {
                job.lease_heartbeat_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(
        &self,
        job_id: DbId,
        worker_id: &str,
        quality: QualityTier,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.worker_id.as_deref() == Some(worker_id) {
                job.status_id = JobStatus::queued_for(quality).id();
                job.worker_id = None;
                job.lease_heartbeat_at = None;
            }
        }
        Ok(())
    }

    async fn detach(&self, job_id: DbId, worker_id: &str) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.worker_id.as_deref() == Some(worker_id) {
                job.worker_id = None;
                job.lease_heartbeat_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn requeue(
        &self,
        job_id: DbId,
        quality: QualityTier,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if Self::is_running(job.status_id) {
                job.status_id = JobStatus::queued_for(quality).id();
                job.retry_count += 1;
                job.error_message = Some(reason.to_string());
                job.progress = 0;
                job.worker_id = None;
                job.lease_heartbeat_at = None;
            }
        }
        Ok(())
    }

    async fn fail(&self, job_id: DbId, reason: &str) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&job_id) {
            Some(job) if Self::is_running(job.status_id) => {
                job.status_id = JobStatus::Failed.id();
                job.error_message = Some(reason.to_string());
                job.completed_at = Some(Utc::now());
                job.worker_id = None;
                job.lease_heartbeat_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(
        &self,
        job_id: DbId,
        quality: QualityTier,
        result_url: &str,
        cost_cents: i64,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&job_id) {
            Some(job) if Self::is_running(job.status_id) => {
                job.status_id = JobStatus::ready_for(quality).id();
                job.result_url = Some(result_url.to_string());
                job.cost_cents += cost_cents;
                job.progress = 100;
                job.error_message = None;
                match quality {
                    QualityTier::Preview => job.preview_completed_at = Some(Utc::now()),
                    QualityTier::Final => job.completed_at = Some(Utc::now()),
                }
                job.worker_id = None;
                job.lease_heartbeat_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_external_job_id(
        &self,
        job_id: DbId,
        external_job_id: &str,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            job.external_job_id = Some(external_job_id.to_string());
        }
        Ok(())
    }

    async fn set_progress(&self, job_id: DbId, progress: i16) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if Self::is_running(job.status_id) {
                job.progress = progress.clamp(0, 100);
            }
        }
        Ok(())
    }

    async fn find_by_id(&self, job_id: DbId) -> Result<Option<GenerationJob>, StoreError> {
        Ok(self.jobs.lock().unwrap().get(&job_id).cloned())
    }

    async fn stale_running(
        &self,
        older_than: Duration,
    ) -> Result<Vec<GenerationJob>, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).expect("duration fits");
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| {
                Self::is_running(j.status_id)
                    && match j.lease_heartbeat_at {
                        None => true,
                        Some(at) => at < cutoff,
                    }
            })
            .cloned()
            .collect())
    }

    async fn unsettled_batches(&self) -> Result<Vec<GenerationBatch>, StoreError> {
        let batches = self.batches.lock().unwrap();
        Ok(batches
            .values()
            .filter(|b| {
                b.status_id == BatchStatus::Pending.id()
                    || b.status_id == BatchStatus::AllPreviewsReady.id()
            })
            .cloned()
            .collect())
    }

    async fn batch_child_statuses(&self, batch_id: DbId) -> Result<Vec<StatusId>, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| j.batch_id == Some(batch_id))
            .map(|j| j.status_id)
            .collect())
    }

    async fn set_batch_status(
        &self,
        batch_id: DbId,
        status: BatchStatus,
    ) -> Result<(), StoreError> {
        let mut batches = self.batches.lock().unwrap();
        if let Some(batch) = batches.get_mut(&batch_id) {
            batch.status_id = status.id();
            batch.updated_at = Utc::now();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row builders
// ---------------------------------------------------------------------------

pub fn make_job(id: DbId) -> GenerationJob {
    GenerationJob {
        id,
        workspace_id: 100,
        batch_id: None,
        tool: "image".into(),
        provider_key: "vendor-a".into(),
        quality: "preview".into(),
        params: serde_json::json!({ "prompt": "a quiet harbor at dawn" }),
        status_id: JobStatus::Queued.id(),
        retry_count: 0,
        max_retries: 3,
        external_job_id: None,
        worker_id: None,
        lease_heartbeat_at: None,
        cost_cents: 0,
        reserved_cost_cents: 50,
        result_url: None,
        error_message: None,
        progress: 0,
        created_at: Utc::now(),
        started_at: None,
        preview_completed_at: None,
        completed_at: None,
    }
}

pub fn make_video_job(id: DbId) -> GenerationJob {
    GenerationJob {
        tool: "video".into(),
        ..make_job(id)
    }
}

pub fn make_batch(id: DbId, total_jobs: i32) -> GenerationBatch {
    GenerationBatch {
        id,
        workspace_id: 100,
        total_jobs,
        status_id: BatchStatus::Pending.id(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Scriptable adapter
// ---------------------------------------------------------------------------

type PollHook = Box<dyn Fn(usize) + Send + Sync>;

/// Adapter whose outcomes are scripted per call, with counters and an
/// optional hook fired before each poll result is returned.
pub struct MockAdapter {
    key: String,
    caps: ProviderCapabilities,
    outcomes: Mutex<VecDeque<GenerationOutcome>>,
    polls: Mutex<VecDeque<PollOutcome>>,
    download: Option<Vec<u8>>,
    poll_hook: Option<PollHook>,
    pub generate_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
}

impl MockAdapter {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            caps: ProviderCapabilities::default(),
            outcomes: Mutex::new(VecDeque::new()),
            polls: Mutex::new(VecDeque::new()),
            download: None,
            poll_hook: None,
            generate_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, caps: ProviderCapabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn on_generate(self, outcome: GenerationOutcome) -> Self {
        self.outcomes.lock().unwrap().push_back(outcome);
        self
    }

    pub fn on_poll(self, outcome: PollOutcome) -> Self {
        self.polls.lock().unwrap().push_back(outcome);
        self
    }

    pub fn with_download(mut self, bytes: Vec<u8>) -> Self {
        self.download = Some(bytes);
        self
    }

    /// Run `hook` with the zero-based poll index before each poll returns.
    pub fn with_poll_hook(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.poll_hook = Some(Box::new(hook));
        self
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn key(&self) -> &str {
        &self.key
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.caps.clone()
    }

    async fn generate(&self, _request: &GenerationRequest) -> GenerationOutcome {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(GenerationOutcome::Failed(ProviderFailure::no_result()))
    }

    async fn poll_status(&self, _external_job_id: &str) -> PollOutcome {
        let index = self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.poll_hook {
            hook(index);
        }
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PollOutcome::Processing { progress: None })
    }

    async fn download_result(&self, _external_job_id: &str) -> Result<Vec<u8>, ProviderFailure> {
        match &self.download {
            Some(bytes) => Ok(bytes.clone()),
            None => Err(ProviderFailure::unsupported("result download")),
        }
    }
}

/// Capabilities for an async video vendor that can be polled and downloaded.
pub fn polling_caps() -> ProviderCapabilities {
    ProviderCapabilities {
        supports_polling: true,
        supports_download: true,
        ..ProviderCapabilities::default()
    }
}

/// Capabilities for a vendor that only completes via webhook.
pub fn webhook_only_caps() -> ProviderCapabilities {
    ProviderCapabilities {
        supports_polling: false,
        supports_webhooks: true,
        ..ProviderCapabilities::default()
    }
}

// ---------------------------------------------------------------------------
// Recording collaborators
// ---------------------------------------------------------------------------

/// [`ResultStore`] keeping artifacts in memory.
#[derive(Default)]
pub struct MemoryResults {
    pub stored: Mutex<Vec<(DbId, Vec<u8>, String)>>,
}

#[async_trait]
impl ResultStore for MemoryResults {
    async fn store(
        &self,
        job_id: DbId,
        bytes: &[u8],
        format: &str,
        quality: QualityTier,
    ) -> Result<String, StorageError> {
        self.stored
            .lock()
            .unwrap()
            .push((job_id, bytes.to_vec(), format.to_string()));
        Ok(format!("mem://{job_id}-{}.{format}", quality.as_str()))
    }
}

/// [`CreditLedger`] recording refunds instead of applying them.
#[derive(Default)]
pub struct RecordingLedger {
    pub refunds: Mutex<Vec<(DbId, i64, DbId)>>,
}

#[async_trait]
impl CreditLedger for RecordingLedger {
    async fn refund(
        &self,
        workspace_id: DbId,
        amount_cents: i64,
        job_id: DbId,
    ) -> Result<(), LedgerError> {
        self.refunds
            .lock()
            .unwrap()
            .push((workspace_id, amount_cents, job_id));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine wiring
// ---------------------------------------------------------------------------

/// One engine plus every collaborator the assertions need to inspect.
pub struct TestBed {
    pub store: Arc<MemoryStore>,
    pub circuits: Arc<CircuitRegistry>,
    pub results: Arc<MemoryResults>,
    pub ledger: Arc<RecordingLedger>,
}

impl TestBed {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            circuits: Arc::new(CircuitRegistry::new()),
            results: Arc::new(MemoryResults::default()),
            ledger: Arc::new(RecordingLedger::default()),
        }
    }

    /// Like [`TestBed::new`] but with custom circuit-breaker settings.
    pub fn with_circuit_settings(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            circuits: Arc::new(CircuitRegistry::with_settings(threshold, reset_timeout)),
            ..Self::new()
        }
    }

    pub fn engine_with(&self, adapters: Vec<Arc<dyn ProviderAdapter>>) -> ExecutionEngine {
        let mut registry = ProviderRegistry::new();
        for adapter in adapters {
            registry.register(adapter).expect("unique adapter keys");
        }
        ExecutionEngine::new(
            self.store.clone(),
            Arc::new(registry),
            self.circuits.clone(),
            self.results.clone(),
            self.ledger.clone(),
            WORKER.to_string(),
            EngineConfig {
                poll_timeout: Duration::from_secs(120),
                ..EngineConfig::default()
            },
        )
    }

    pub fn engine(&self, adapter: Arc<MockAdapter>) -> ExecutionEngine {
        self.engine_with(vec![adapter as Arc<dyn ProviderAdapter>])
    }

    /// Claim a single queued job for the test worker.
    pub async fn claim_one(&self, candidate: JobStatus) -> GenerationJob {
        self.store
            .claim(candidate, WORKER, 1)
            .await
            .unwrap()
            .pop()
            .expect("a claimable job")
    }

    pub fn in_flight(&self) -> Arc<Mutex<HashSet<DbId>>> {
        Arc::new(Mutex::new(HashSet::new()))
    }
}
