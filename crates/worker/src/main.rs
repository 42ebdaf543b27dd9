//! Worker binary entry point.

use std::sync::Arc;

use anyhow::Context;
use muse_core::circuit::CircuitRegistry;
use muse_db::store::PgJobStore;
use muse_providers::registry::ProviderRegistry;
use muse_worker::config::WorkerConfig;
use muse_worker::engine::{EngineConfig, ExecutionEngine};
use muse_worker::ledger::PgCreditLedger;
use muse_worker::runner::WorkerLoop;
use muse_worker::storage::FsResultStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "muse_worker=debug,muse_db=info,muse_providers=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    info!(
        worker_id = %config.worker_id,
        max_concurrent = config.max_concurrent,
        "Starting generation worker"
    );

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = muse_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    muse_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    muse_db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let registry = Arc::new(
        ProviderRegistry::from_spec(&config.providers_spec)
            .context("Invalid PROVIDERS configuration")?,
    );
    if registry.is_empty() {
        warn!("No providers configured; every claimed job will fail with NO_ADAPTER");
    } else {
        info!(providers = ?registry.keys(), "Provider registry ready");
    }

    let store = Arc::new(PgJobStore::new(pool.clone()));
    let ledger = Arc::new(PgCreditLedger::new(pool));
    let engine = Arc::new(ExecutionEngine::new(
        store.clone(),
        registry,
        Arc::new(CircuitRegistry::new()),
        Arc::new(FsResultStore::new(config.result_root.clone())),
        ledger.clone(),
        config.worker_id.clone(),
        EngineConfig::default(),
    ));
    let worker = WorkerLoop::new(store, engine, ledger, config);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    worker.run(shutdown).await;
    info!("Worker stopped");
    Ok(())
}
