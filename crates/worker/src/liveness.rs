//! Liveness file for external process supervision.
//!
//! The main loop touches this file every tick; a supervisor that finds it
//! older than a few intervals restarts the process.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Write the current epoch-seconds timestamp to the liveness file.
pub async fn touch(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    tokio::fs::write(path, now.to_string()).await
}
