//! Background worker that executes queued generation jobs.
//!
//! Multiple worker processes share one Postgres-backed queue; atomic
//! claiming in the store keeps them from stepping on each other without any
//! worker-to-worker coordination.

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod liveness;
pub mod reaper;
pub mod runner;
pub mod storage;
