//! Mesh diagnostics transport layer
//!
//! This crate provides:
//! - The `Transport` interface the diagnostics core is layered on
//! - Inbound message channel types
//! - An in-process memory mesh for embedding and tests

pub mod traits;
pub mod memory;

pub use traits::*;
pub use memory::{MemoryMesh, MemoryTransport};
