//! Error types for the CRF inference/training core.
//!
//! One variant per row of the error-kind table: recoverable errors leave
//! the Encoder (or option-exchange call) usable; fatal ones do not.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type CrfResult<T> = Result<T, CrfError>;

/// Errors raised by the inference core, the feature index, the encoder
/// level cache, or the model file layer.
#[derive(Error, Debug)]
pub enum CrfError {
    #[error("allocation failed: {0}")]
    OutOfMemory(String),

    #[error("invalid model file: {0}")]
    InvalidModelFile(String),

    #[error("invalid instance: {0}")]
    InvalidInstance(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported operation for this graph variant: {0}")]
    UnsupportedVariant(String),

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrfError {
    /// Whether the Encoder (or the single operation that raised this error)
    /// remains usable afterwards.
    ///
    /// `InvalidInstance` fails only the operation that triggered it;
    /// `InvalidConfig` fails only the option-exchange call with no side
    /// effects. Every other variant is fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CrfError::InvalidInstance(_) | CrfError::InvalidConfig(_))
    }
}
