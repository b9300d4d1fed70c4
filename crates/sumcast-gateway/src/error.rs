//! Error types for the summary gateway.

use thiserror::Error;

/// Gateway error types.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Rate spec string did not parse as `"N/W"`.
    #[error("Invalid rate spec '{0}': expected \"N/W\" with positive integers")]
    InvalidRateSpec(String),

    /// Listener or server I/O failure.
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
