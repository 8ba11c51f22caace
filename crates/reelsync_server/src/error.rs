//! Error types for the sync server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authorization failed.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Action application exceeded the processing deadline. Reported to the
    /// client as a retryable failure, never as a conflict.
    #[error("processing deadline exceeded")]
    DeadlineExceeded,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_) | ServerError::NotAuthorized(_)
        )
    }

    /// Returns true if this is a server error (5xx) the client may retry.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::DeadlineExceeded | ServerError::Internal(_) | ServerError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::NotAuthorized("nope".into()).is_client_error());
        assert!(ServerError::DeadlineExceeded.is_server_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
    }
}
