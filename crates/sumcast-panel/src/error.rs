//! Error types for panel encoding and hashing.

use thiserror::Error;

/// Panel encoding error types.
#[derive(Debug, Error)]
pub enum PanelError {
    /// Value could not be serialized to JSON.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Nesting exceeded the canonicalizer's depth limit.
    #[error("Canonicalization depth limit exceeded at level {0}")]
    DepthExceeded(usize),
}

/// Result type alias for panel operations.
pub type Result<T> = std::result::Result<T, PanelError>;
