//! Provider registry: maps a job's declared provider key to an adapter.
//!
//! The registry is built once at process start and validated there —
//! duplicate or malformed registrations abort startup rather than surfacing
//! as per-job dispatch failures later.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::{ProviderAdapter, ProviderCapabilities};
use crate::rest::{RestProvider, RestProviderConfig};

/// Errors raised while assembling the registry at startup.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Duplicate provider key: '{0}'")]
    DuplicateKey(String),

    #[error("Invalid provider spec entry: '{0}' (expected key=base_url)")]
    InvalidSpec(String),
}

/// Immutable lookup table of provider adapters.
#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own key. Rejects duplicates.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) -> Result<(), RegistryError> {
        let key = adapter.key().to_string();
        if self.adapters.contains_key(&key) {
            return Err(RegistryError::DuplicateKey(key));
        }
        self.adapters.insert(key, adapter);
        Ok(())
    }

    /// Look up the adapter for a provider key.
    pub fn resolve(&self, key: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(key).cloned()
    }

    /// All registered provider keys.
    pub fn keys(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Build a registry of [`RestProvider`]s from a comma-separated
    /// `key=base_url` spec (the `PROVIDERS` environment variable). All
    /// entries share one HTTP client for connection pooling.
    pub fn from_spec(spec: &str) -> Result<Self, RegistryError> {
        let client = reqwest::Client::new();
        let mut registry = Self::new();

        for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, base_url) = entry
                .split_once('=')
                .ok_or_else(|| RegistryError::InvalidSpec(entry.to_string()))?;
            if key.is_empty() || base_url.is_empty() {
                return Err(RegistryError::InvalidSpec(entry.to_string()));
            }
            let api_key = std::env::var(format!(
                "PROVIDER_{}_API_KEY",
                key.to_uppercase().replace('-', "_")
            ))
            .ok();
            let adapter = RestProvider::with_client(
                client.clone(),
                RestProviderConfig {
                    key: key.to_string(),
                    base_url: base_url.trim_end_matches('/').to_string(),
                    api_key,
                    capabilities: ProviderCapabilities {
                        supports_polling: true,
                        supports_download: true,
                        ..ProviderCapabilities::default()
                    },
                },
            );
            registry.register(Arc::new(adapter))?;
        }

        Ok(registry)
    }
}
