//! Error types for accumulator state tracking

use stele_crypto::CryptoError;
use thiserror::Error;

/// Errors produced while tracking published accumulator transitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// A delta arrived out of order
    #[error("delta sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    /// A delta does not start from the tracked state
    #[error("delta {sequence} does not start from the tracked state")]
    PriorStateMismatch { sequence: u64 },

    /// A delta's published proof failed verification
    #[error("proof verification failed for delta {sequence}")]
    ProofVerificationFailed { sequence: u64 },

    /// A delta's states and products disagree
    #[error("delta {sequence} is internally inconsistent")]
    InconsistentDelta { sequence: u64 },

    /// The checkpoint's branch was discarded by a reorg
    #[error("checkpoint at sequence {sequence} no longer matches retained history")]
    StaleCheckpoint { sequence: u64 },

    /// The checkpoint lies outside the retained window
    #[error("checkpoint at sequence {sequence} is outside the retained window")]
    UnknownCheckpoint { sequence: u64 },

    /// A reorg reaches deeper than the configured bound
    #[error("reorg depth {depth} exceeds maximum {max}")]
    ReorgTooDeep { depth: u64, max: u64 },

    /// Arithmetic failure from the accumulator layer
    #[error("accumulator arithmetic: {0}")]
    Crypto(#[from] CryptoError),
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;
