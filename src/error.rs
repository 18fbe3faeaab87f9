//! Error types for driftkv
//!
//! Provides a unified error type for all fallible operations. Contract
//! violations (duplicate skip list keys, misuse of the arena) are panics,
//! not variants here.

use thiserror::Error;

/// Result type alias using DriftError
pub type Result<T> = std::result::Result<T, DriftError>;

/// Unified error type for driftkv operations
#[derive(Debug, Error)]
pub enum DriftError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Data Errors
    // -------------------------------------------------------------------------
    /// Malformed persisted bytes: log fragments, write batches, internal keys.
    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DriftError {
    pub fn corruption(msg: impl Into<String>) -> Self {
        DriftError::Corruption(msg.into())
    }

    /// True for errors caused by malformed data rather than the environment.
    pub fn is_corruption(&self) -> bool {
        matches!(self, DriftError::Corruption(_))
    }
}
