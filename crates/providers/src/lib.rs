//! Provider adapters for third-party AI content-generation vendors.
//!
//! Defines the uniform contract the execution engine drives — start work,
//! optionally poll and download — plus a generic REST adapter and the
//! startup-validated registry that maps a job's provider key to an adapter.

pub mod adapter;
pub mod http;
pub mod registry;
pub mod rest;
