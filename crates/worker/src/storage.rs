//! Artifact persistence.
//!
//! Vendors hand back bytes or short-lived URLs; the engine durably stores
//! the bytes through this seam and records the returned location on the job
//! row. The filesystem implementation is what single-host deployments run;
//! object storage slots in behind the same trait.

use std::path::PathBuf;

use async_trait::async_trait;
use muse_core::tool::QualityTier;
use muse_core::types::DbId;

/// Errors raised while persisting an artifact.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable artifact storage keyed by job and quality tier.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist the artifact and return the URL to record on the job row.
    async fn store(
        &self,
        job_id: DbId,
        bytes: &[u8],
        format: &str,
        quality: QualityTier,
    ) -> Result<String, StorageError>;
}

/// Filesystem-backed [`ResultStore`] writing under a configured root.
pub struct FsResultStore {
    root: PathBuf,
}

impl FsResultStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, job_id: DbId, format: &str, quality: QualityTier) -> PathBuf {
        self.root
            .join(format!("{job_id}-{}.{format}", quality.as_str()))
    }
}

#[async_trait]
impl ResultStore for FsResultStore {
    async fn store(
        &self,
        job_id: DbId,
        bytes: &[u8],
        format: &str,
        quality: QualityTier,
    ) -> Result<String, StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(job_id, format, quality);
        tokio::fs::write(&path, bytes).await?;
        Ok(format!("file://{}", path.display()))
    }
}
