//! Error types for the client engine.

use thiserror::Error;
use uuid::Uuid;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client engine.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Wire encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Protocol-level error from shared message handling.
    #[error(transparent)]
    Protocol(#[from] reelsync_protocol::ProtocolError),

    /// Local journal I/O failed.
    #[error("journal error: {0}")]
    Journal(#[from] std::io::Error),

    /// The journal is corrupt before its final record.
    #[error("corrupt journal at line {line}: {reason}")]
    CorruptJournal {
        /// 1-based line number.
        line: usize,
        /// What failed to parse.
        reason: String,
    },

    /// Another process holds the journal lock.
    #[error("journal is locked by another process: {0}")]
    JournalLocked(std::path::PathBuf),

    /// No queue entry with this id exists.
    #[error("unknown queue entry {0}")]
    UnknownEntry(Uuid),

    /// The flush was cancelled between entries; unsent entries stay queued.
    #[error("flush cancelled")]
    Cancelled,

    /// A batch flush was requested while another flush was running.
    #[error("a flush is already in progress")]
    FlushInProgress,
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the failed operation can be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport { retryable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ClientError::transport_retryable("connection reset").is_retryable());
        assert!(!ClientError::transport_fatal("TLS handshake failed").is_retryable());
        assert!(!ClientError::UnknownEntry(Uuid::nil()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ClientError::CorruptJournal {
            line: 7,
            reason: "truncated".into(),
        };
        assert!(err.to_string().contains("line 7"));
    }
}
