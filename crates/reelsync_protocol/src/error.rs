//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur when encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A field carried a value outside its valid range.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A query string could not be parsed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl ProtocolError {
    /// Creates an invalid-field error.
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::invalid_field("rating", "must be between 0 and 10");
        assert!(err.to_string().contains("rating"));

        let err = ProtocolError::InvalidQuery("since is not a number".into());
        assert!(err.to_string().contains("since"));
    }
}
