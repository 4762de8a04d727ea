//! Error types for accumulator arithmetic

use thiserror::Error;

/// Errors produced by accumulator parameter handling and witness arithmetic
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Modulus failed validation
    #[error("modulus must be an odd integer greater than 3")]
    InvalidModulus,

    /// Generator outside the group
    #[error("generator must lie strictly between 1 and the modulus")]
    InvalidGenerator,

    /// A group value does not fit the fixed wire width
    #[error("value needs {needed} bytes but the wire width is {width}")]
    ValueTooWide { needed: usize, width: usize },

    /// Wire bytes have the wrong length for this parameter set
    #[error("wire value is {actual} bytes, expected {expected}")]
    WireWidthMismatch { expected: usize, actual: usize },

    /// The element does not divide the batch product exactly
    #[error("element {element} does not divide the batch product")]
    ElementNotInBatch { element: u64 },

    /// A batch operation was handed no elements
    #[error("element batch is empty")]
    EmptyBatch,

    /// The two roots disagree on the accumulated value
    #[error("roots disagree on the accumulated value")]
    RootMismatch,

    /// Root merging requires coprime exponents
    #[error("exponents share a common factor, cannot merge roots")]
    NotCoprime,

    /// No modular inverse exists for the value
    #[error("value has no inverse modulo N")]
    NoInverse,
}

/// Result type for accumulator arithmetic
pub type CryptoResult<T> = Result<T, CryptoError>;
