//! Mesh diagnostics test harness
//!
//! This crate provides:
//! - A chaos transport (latency, loss, reordering, duplication)
//! - A mesh harness running N diagnostics nodes in one process
//! - End-to-end room probe scenarios and report checks

pub mod chaos;
pub mod harness;
pub mod integration;

pub use chaos::*;
pub use harness::*;
pub use integration::*;
