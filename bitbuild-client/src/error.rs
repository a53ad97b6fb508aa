//! Error types for conversion clients

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the image conversion service
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// External CLI command exited unsuccessfully
    #[error("Command '{command}' failed (exit code {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Local I/O failed (reading the artifact, spawning a command)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }

    /// Check if retrying the same call may succeed
    ///
    /// Transport failures, server errors and CLI failures are treated as
    /// infrastructure hiccups; malformed responses and rejected requests are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::CommandFailed { .. } | Self::Io(_) => true,
            Self::ApiError { .. } => self.is_server_error(),
            Self::ParseError(_) | Self::InvalidRequest(_) => false,
        }
    }
}
