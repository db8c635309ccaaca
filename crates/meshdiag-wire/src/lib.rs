//! Mesh diagnostics wire format
//!
//! Envelopes travel as JSON objects over the transport's diagnostics
//! channel:
//! - `{"opcode": "testP2PConnection", "id": n}` asks a peer for its view
//! - `{"opcode": "response", "id": n, "data": {...}}` answers it
//! - any other string opcode is an application command with `cmdData`

pub mod envelope;

pub use envelope::*;
