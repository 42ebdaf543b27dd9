//! The provider adapter contract.
//!
//! One adapter exists per vendor+model combination. Adapters are stateless
//! and safe to share across jobs. Ordinary vendor errors are structured
//! return values, never `Err` — `generate` and `poll_status` convert
//! transport failures into retryable [`ProviderFailure`]s internally, so the
//! engine only ever matches on outcomes.

use async_trait::async_trait;
use muse_core::tool::{QualityTier, ToolType};
use muse_core::types::DbId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Free-form generation parameters carried on the job row as JSONB.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub aspect_ratio: Option<String>,
    pub duration_secs: Option<f64>,
    pub resolution: Option<String>,
    pub style: Option<String>,
    pub voice_id: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub reference_urls: Vec<String>,
    /// Arbitrary vendor-specific extras, passed through untouched.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Everything an adapter needs to start work on one job.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Platform job id; adapters for vendors with idempotency-key support
    /// pass this through so crash-retries do not double-submit.
    pub job_id: DbId,
    pub tool: ToolType,
    pub quality: QualityTier,
    pub params: GenerationParams,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// A finished artifact, delivered inline or as a fetchable URL.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Option<Vec<u8>>,
    pub url: Option<String>,
    /// File format, e.g. `mp4`, `png`, `wav`, `txt`.
    pub format: String,
    pub cost_cents: i64,
    pub metadata: Option<serde_json::Value>,
}

/// What a call to [`ProviderAdapter::generate`] produced.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    /// The vendor finished synchronously.
    Completed(Artifact),
    /// Work is in progress remotely under the vendor's own job id.
    Accepted { external_job_id: String },
    /// An ordinary vendor failure, classified for the retry policy.
    Failed(ProviderFailure),
}

/// One observation of a remote job's progress.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Processing { progress: Option<i16> },
    Completed { result_url: Option<String> },
    Failed(ProviderFailure),
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Stable failure classification consumed by the retry policy and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    /// No adapter is registered for the job's provider key.
    NoAdapter,
    /// The job is missing a required input (caller error).
    MissingInput,
    /// The vendor rejected the request (4xx other than 429).
    VendorRejected,
    /// The vendor is overloaded or erroring (429/5xx).
    VendorUnavailable,
    /// Transport-level failure (DNS, TLS, connect, timeout).
    Network,
    /// The adapter returned neither an artifact nor a job id — a defect.
    NoResult,
    /// The remote job did not complete within the poll budget.
    PollTimeout,
    /// The adapter does not implement the requested operation.
    Unsupported,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::NoAdapter => "NO_ADAPTER",
            FailureCode::MissingInput => "MISSING_INPUT",
            FailureCode::VendorRejected => "VENDOR_REJECTED",
            FailureCode::VendorUnavailable => "VENDOR_UNAVAILABLE",
            FailureCode::Network => "NETWORK",
            FailureCode::NoResult => "NO_RESULT",
            FailureCode::PollTimeout => "POLL_TIMEOUT",
            FailureCode::Unsupported => "UNSUPPORTED",
        }
    }
}

/// A structured vendor failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {message}", code.as_str())]
pub struct ProviderFailure {
    pub code: FailureCode,
    pub message: String,
    pub retryable: bool,
}

impl ProviderFailure {
    pub fn no_adapter(key: &str) -> Self {
        Self {
            code: FailureCode::NoAdapter,
            message: format!("No adapter registered for provider '{key}'"),
            retryable: false,
        }
    }

    pub fn missing_input(message: impl Into<String>) -> Self {
        Self {
            code: FailureCode::MissingInput,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            code: FailureCode::Network,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn no_result() -> Self {
        Self {
            code: FailureCode::NoResult,
            message: "Provider returned neither an artifact nor a job id".into(),
            retryable: false,
        }
    }

    pub fn poll_timeout() -> Self {
        Self {
            code: FailureCode::PollTimeout,
            message: "Timed out waiting for completion".into(),
            retryable: true,
        }
    }

    /// An async acceptance landing on a path with no way to retrieve the
    /// result (the adapter declares neither polling nor webhooks).
    pub fn unpollable_accept(external_job_id: &str) -> Self {
        Self {
            code: FailureCode::Unsupported,
            message: format!(
                "Provider accepted remote job '{external_job_id}' but the adapter \
                 declares no way to retrieve its result"
            ),
            retryable: false,
        }
    }

    pub fn unsupported(operation: &str) -> Self {
        Self {
            code: FailureCode::Unsupported,
            message: format!("Adapter does not support {operation}"),
            retryable: false,
        }
    }

    /// Classify an HTTP response status: 429 and 5xx are vendor-health
    /// issues worth retrying, other 4xx are permanent rejections.
    pub fn from_http_status(status: u16, body: &str) -> Self {
        let retryable = status == 429 || status >= 500;
        Self {
            code: if retryable {
                FailureCode::VendorUnavailable
            } else {
                FailureCode::VendorRejected
            },
            message: format!("Vendor returned HTTP {status}: {body}"),
            retryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Static adapter capabilities, declared once and consumed by the resolver
/// and the sync/async path decision. Rate-limit fields are advisory.
#[derive(Debug, Clone)]
pub struct ProviderCapabilities {
    pub supports_preview: bool,
    pub supports_final: bool,
    /// The adapter can poll the vendor for remote job status.
    pub supports_polling: bool,
    /// The vendor can complete jobs out-of-band via webhook.
    pub supports_webhooks: bool,
    /// The adapter can download a result by external job id (for vendors
    /// whose poll endpoint returns transient, auth-gated URLs).
    pub supports_download: bool,
    pub max_batch_size: u32,
    pub max_concurrency: u32,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supports_preview: true,
            supports_final: true,
            supports_polling: false,
            supports_webhooks: false,
            supports_download: false,
            max_batch_size: 1,
            max_concurrency: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// The contract
// ---------------------------------------------------------------------------

/// Uniform contract for starting vendor work and, optionally, polling and
/// downloading results.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The provider key jobs use to select this adapter.
    fn key(&self) -> &str;

    /// Static capability declaration.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Start work. Never returns `Err` for ordinary vendor errors; transport
    /// failures come back as retryable [`GenerationOutcome::Failed`].
    async fn generate(&self, request: &GenerationRequest) -> GenerationOutcome;

    /// Poll a remote job. Only called when `supports_polling` is declared.
    async fn poll_status(&self, external_job_id: &str) -> PollOutcome {
        let _ = external_job_id;
        PollOutcome::Failed(ProviderFailure::unsupported("status polling"))
    }

    /// Fetch the finished artifact by external job id. Only called when
    /// `supports_download` is declared.
    async fn download_result(&self, external_job_id: &str) -> Result<Vec<u8>, ProviderFailure> {
        let _ = external_job_id;
        Err(ProviderFailure::unsupported("result download"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_429_is_retryable() {
        let f = ProviderFailure::from_http_status(429, "slow down");
        assert!(f.retryable);
        assert_eq!(f.code, FailureCode::VendorUnavailable);
    }

    #[test]
    fn http_5xx_is_retryable() {
        assert!(ProviderFailure::from_http_status(500, "").retryable);
        assert!(ProviderFailure::from_http_status(503, "").retryable);
    }

    #[test]
    fn http_4xx_is_permanent() {
        let f = ProviderFailure::from_http_status(400, "bad prompt");
        assert!(!f.retryable);
        assert_eq!(f.code, FailureCode::VendorRejected);
        assert!(!ProviderFailure::from_http_status(422, "").retryable);
    }

    #[test]
    fn params_deserialize_with_missing_fields() {
        let params: GenerationParams = serde_json::from_value(serde_json::json!({
            "prompt": "a quiet harbor at dawn"
        }))
        .unwrap();
        assert_eq!(params.prompt.as_deref(), Some("a quiet harbor at dawn"));
        assert!(params.reference_urls.is_empty());
        assert!(params.metadata.is_empty());
    }

    #[test]
    fn failure_display_includes_code() {
        let f = ProviderFailure::no_adapter("vendor-x");
        assert!(f.to_string().starts_with("NO_ADAPTER"));
    }
}
