//! Domain logic for the Muse generation platform.
//!
//! This crate has zero internal dependencies so it can be shared by the
//! worker binary, the repository layer, and any future CLI tooling. It holds
//! the pure parts of the job engine: lifecycle state machine, retry policy,
//! circuit breaking, and batch status rollup.

pub mod batch;
pub mod circuit;
pub mod error;
pub mod lifecycle;
pub mod retry;
pub mod tool;
pub mod types;
