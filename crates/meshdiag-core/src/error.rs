//! Error types for mesh diagnostics

use thiserror::Error;

use crate::{PeerId, TransactionId};

/// Core diagnostics errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiagError {
    // Caller errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: &'static str, reason: String },

    // Wire errors
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Envelope too large: {size} > {max}")]
    EnvelopeTooLarge { size: usize, max: usize },

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    // Registry errors
    #[error("Transaction {0} is already registered")]
    DuplicateTransaction(TransactionId),

    #[error("Transaction {0} was never allocated")]
    UnallocatedTransaction(TransactionId),

    #[error("Transaction registry full ({limit} pending)")]
    RegistryFull { limit: usize },

    // Completion errors
    #[error("Probe of {peer} timed out (transaction {id})")]
    TimedOut { peer: PeerId, id: TransactionId },

    #[error("Transaction {0} cancelled before a reply arrived")]
    Cancelled(TransactionId),

    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl DiagError {
    /// Did the probe end without a reply (expired or cancelled)?
    pub fn is_unanswered(&self) -> bool {
        matches!(self, DiagError::TimedOut { .. } | DiagError::Cancelled(_))
    }
}

/// Result type for diagnostics operations
pub type DiagResult<T> = Result<T, DiagError>;
