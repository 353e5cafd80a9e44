//! Error types for the engine client

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur when talking to the container engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Engine returned an error status code
    #[error("Error response from daemon (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the engine
        message: String,
    },

    /// Object does not exist
    #[error("No such object: {0}")]
    NotFound(String),

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Stream I/O failed
    #[error("Stream error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine endpoint cannot be used
    #[error("Invalid engine host: {0}")]
    InvalidHost(String),
}

impl EngineError {
    /// Create an API error from status code and message
    ///
    /// A 404 becomes `NotFound`.
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 404 {
            return Self::NotFound(message);
        }
        Self::ApiError { status, message }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}
