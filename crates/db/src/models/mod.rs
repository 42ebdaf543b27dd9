pub mod batch;
pub mod generation;
pub mod status;
