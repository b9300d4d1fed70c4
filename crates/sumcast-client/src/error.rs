//! Error types for client-side state handling.

use thiserror::Error;

/// Client error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Patch addresses no target key.
    #[error("Patch addresses no target key")]
    MissingKey,

    /// Diff payload must be a map.
    #[error("Diff payload for '{0}' is not a map")]
    DiffNotMap(String),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
