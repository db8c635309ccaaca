//! Mesh diagnostics runtime
//!
//! This crate implements the transaction-correlated diagnostics protocol:
//! - Transaction registry (pending probes keyed by transaction id)
//! - Probe responder (local view of the room)
//! - Inbound dispatcher (probe, response, command, unknown)
//! - Fan-out aggregator (single-peer and whole-room probes)
//! - Node runtime (inbound loop and stale-transaction reaper)
//! - Configuration, counters and tracing setup

pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod node;
pub mod observability;
pub mod registry;
pub mod responder;
pub mod stats;

pub use config::*;
pub use diagnostics::*;
pub use dispatch::*;
pub use node::*;
pub use observability::*;
pub use registry::*;
pub use responder::*;
pub use stats::*;
