//! Shared HTTP plumbing for REST-style vendor adapters.

use crate::adapter::ProviderFailure;

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or a classified [`ProviderFailure`] built from the
/// status and body text on failure.
pub async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderFailure> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(ProviderFailure::from_http_status(status.as_u16(), &body));
    }
    Ok(response)
}

/// Fetch raw bytes from a vendor-hosted URL, converting transport failures
/// into retryable network failures.
pub async fn fetch_bytes(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<u8>, ProviderFailure> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ProviderFailure::network(format!("Fetch of {url} failed: {e}")))?;
    let response = ensure_success(response).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProviderFailure::network(format!("Reading body of {url} failed: {e}")))?;
    Ok(bytes.to_vec())
}
