//! Mesh diagnostics core - Fundamental types
//!
//! This crate defines the types shared by every diagnostics layer:
//! - Identifiers (PeerId, TransactionId)
//! - Connection status and per-peer status reports
//! - Aggregate room reports
//! - Error taxonomy

pub mod id;
pub mod status;
pub mod error;

pub use id::*;
pub use status::*;
pub use error::*;
