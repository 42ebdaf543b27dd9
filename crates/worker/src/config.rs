//! Worker configuration, loaded from environment variables.
//!
//! | Variable                  | Default                  | Meaning                                        |
//! |---------------------------|--------------------------|------------------------------------------------|
//! | `WORKER_ID`               | `worker-<random>`        | Stable identity stamped on leases              |
//! | `MAX_CONCURRENT`          | `5`                      | In-flight job ceiling for this process         |
//! | `POLL_INTERVAL_MS`        | `1000`                   | Main loop tick interval                        |
//! | `MAINTENANCE_EVERY_CYCLES`| `30`                     | Reaper/aggregator cadence, in loop ticks       |
//! | `DRAIN_TIMEOUT_SECS`      | `30`                     | Grace period for in-flight jobs on shutdown    |
//! | `RESULT_ROOT`             | `./data/results`         | Directory artifacts are written under          |
//! | `LIVENESS_FILE`           | `./data/worker-liveness` | File touched every tick for external liveness  |
//! | `PROVIDERS`               | (empty)                  | Comma-separated `key=base_url` adapter entries |
//!
//! `DATABASE_URL` is read separately at startup; it has no default.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for one worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub max_concurrent: usize,
    pub poll_interval: Duration,
    pub maintenance_every: u64,
    pub drain_timeout: Duration,
    pub result_root: PathBuf,
    pub liveness_file: PathBuf,
    pub providers_spec: String,
}

impl WorkerConfig {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Panics on unparseable values: a worker with a half-applied config is
    /// worse than one that refuses to start.
    pub fn from_env() -> Self {
        Self {
            worker_id: std::env::var("WORKER_ID").unwrap_or_else(|_| default_worker_id()),
            max_concurrent: env_parsed("MAX_CONCURRENT", 5),
            poll_interval: Duration::from_millis(env_parsed("POLL_INTERVAL_MS", 1_000)),
            maintenance_every: env_parsed("MAINTENANCE_EVERY_CYCLES", 30),
            drain_timeout: Duration::from_secs(env_parsed("DRAIN_TIMEOUT_SECS", 30)),
            result_root: PathBuf::from(
                std::env::var("RESULT_ROOT").unwrap_or_else(|_| "./data/results".into()),
            ),
            liveness_file: PathBuf::from(
                std::env::var("LIVENESS_FILE").unwrap_or_else(|_| "./data/worker-liveness".into()),
            ),
            providers_spec: std::env::var("PROVIDERS").unwrap_or_default(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be a valid number: {e}")),
        Err(_) => default,
    }
}

/// Identity for workers that do not configure one. Random per process, so
/// two unconfigured workers on the same host never share leases.
fn default_worker_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_ids_are_unique() {
        assert_ne!(default_worker_id(), default_worker_id());
        assert!(default_worker_id().starts_with("worker-"));
    }
}
