//! Generic REST vendor adapter.
//!
//! Most hosted generation vendors expose the same three-endpoint shape:
//! submit a generation, poll it by id, download the finished content. This
//! adapter speaks that shape against a configured base URL; vendor-specific
//! payload quirks belong in dedicated adapters, not here.

use async_trait::async_trait;
use serde::Deserialize;

use crate::adapter::{
    Artifact, GenerationOutcome, GenerationRequest, PollOutcome, ProviderAdapter,
    ProviderCapabilities, ProviderFailure,
};
use crate::http;

/// Configuration for one REST vendor endpoint.
#[derive(Debug, Clone)]
pub struct RestProviderConfig {
    /// Provider key jobs use to select this adapter.
    pub key: String,
    /// Base HTTP URL, e.g. `https://api.vendor-a.example`.
    pub base_url: String,
    /// Bearer token sent as `Authorization`, when the vendor requires one.
    pub api_key: Option<String>,
    pub capabilities: ProviderCapabilities,
}

/// A [`ProviderAdapter`] over the generic submit/poll/download REST shape.
pub struct RestProvider {
    config: RestProviderConfig,
    client: reqwest::Client,
}

/// Response body of `POST /generations`.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    /// Vendor job id for asynchronous work.
    id: Option<String>,
    /// Fetchable artifact URL for synchronous completions.
    url: Option<String>,
    format: Option<String>,
    cost_cents: Option<i64>,
    metadata: Option<serde_json::Value>,
}

/// Response body of `GET /generations/{id}`.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    progress: Option<i16>,
    url: Option<String>,
    error: Option<String>,
}

impl RestProvider {
    pub fn new(config: RestProviderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling across
    /// providers.
    pub fn with_client(client: reqwest::Client, config: RestProviderConfig) -> Self {
        Self { config, client }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl ProviderAdapter for RestProvider {
    fn key(&self) -> &str {
        &self.config.key
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.config.capabilities.clone()
    }

    async fn generate(&self, request: &GenerationRequest) -> GenerationOutcome {
        let body = serde_json::json!({
            "tool": request.tool.as_str(),
            "quality": request.quality.as_str(),
            "params": request.params,
        });

        // The job id doubles as an idempotency key so a crash between
        // submission and persisting the vendor id cannot double-bill.
        let send = self
            .authorize(
                self.client
                    .post(format!("{}/generations", self.config.base_url)),
            )
            .header("Idempotency-Key", request.job_id.to_string())
            .json(&body)
            .send()
            .await;

        let response = match send {
            Ok(r) => r,
            Err(e) => {
                return GenerationOutcome::Failed(ProviderFailure::network(format!(
                    "Submission to {} failed: {e}",
                    self.config.key
                )))
            }
        };

        let response = match http::ensure_success(response).await {
            Ok(r) => r,
            Err(failure) => return GenerationOutcome::Failed(failure),
        };

        let parsed: SubmitResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                return GenerationOutcome::Failed(ProviderFailure::network(format!(
                    "Malformed submission response from {}: {e}",
                    self.config.key
                )))
            }
        };

        if let Some(url) = parsed.url {
            return GenerationOutcome::Completed(Artifact {
                bytes: None,
                url: Some(url),
                format: parsed.format.unwrap_or_else(|| "bin".into()),
                cost_cents: parsed.cost_cents.unwrap_or(0),
                metadata: parsed.metadata,
            });
        }
        if let Some(id) = parsed.id {
            return GenerationOutcome::Accepted {
                external_job_id: id,
            };
        }
        GenerationOutcome::Failed(ProviderFailure::no_result())
    }

    async fn poll_status(&self, external_job_id: &str) -> PollOutcome {
        let send = self
            .authorize(self.client.get(format!(
                "{}/generations/{external_job_id}",
                self.config.base_url
            )))
            .send()
            .await;

        let response = match send {
            Ok(r) => r,
            Err(e) => {
                return PollOutcome::Failed(ProviderFailure::network(format!(
                    "Polling {} failed: {e}",
                    self.config.key
                )))
            }
        };

        let response = match http::ensure_success(response).await {
            Ok(r) => r,
            Err(failure) => return PollOutcome::Failed(failure),
        };

        let parsed: StatusResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                return PollOutcome::Failed(ProviderFailure::network(format!(
                    "Malformed status response from {}: {e}",
                    self.config.key
                )))
            }
        };

        match parsed.status.as_str() {
            "completed" => PollOutcome::Completed {
                result_url: parsed.url,
            },
            "failed" => PollOutcome::Failed(ProviderFailure {
                code: crate::adapter::FailureCode::VendorRejected,
                message: parsed
                    .error
                    .unwrap_or_else(|| "Vendor reported failure without detail".into()),
                retryable: false,
            }),
            _ => PollOutcome::Processing {
                progress: parsed.progress,
            },
        }
    }

    async fn download_result(&self, external_job_id: &str) -> Result<Vec<u8>, ProviderFailure> {
        let url = format!(
            "{}/generations/{external_job_id}/content",
            self.config.base_url
        );
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ProviderFailure::network(format!("Download from {url} failed: {e}")))?;
        let response = http::ensure_success(response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderFailure::network(format!("Reading {url} failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}
