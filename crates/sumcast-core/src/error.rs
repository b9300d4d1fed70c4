//! Error types for sumcast-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid panel key: {0}")]
    InvalidPanelKey(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
