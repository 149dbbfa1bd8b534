use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;

/// Classification of task-level failures.
///
/// Callers use the kind to tell "retry later" from "this file is bad" from
/// "the system is under load".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Read failures and deadline expiry; retried by the scheduler.
    TransientIo,
    /// Malformed or unsupported content, or a reference that can never resolve.
    PermanentFormat,
    /// Oversized artifacts, saturated queues.
    ResourceExhaustion,
    /// Cooperative cancellation was honoured.
    Cancelled,
    /// An extractor panicked or violated its contract.
    Internal,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientIo | ErrorKind::ResourceExhaustion)
    }
}

/// Task-level extraction error.
///
/// The type is `Clone` so that a terminal result can be observed by several
/// parties; I/O errors are therefore stored as their kind plus message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("i/o error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("malformed {format} content: {message}")]
    Malformed { format: String, message: String },

    #[error("unsupported format `{0}`")]
    Unsupported(String),

    #[error("file `{file}` could not be resolved: {message}")]
    NotFound { file: String, message: String },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("cancelled")]
    Cancelled,

    #[error("extractor panicked: {0}")]
    Panicked(String),

    /// Free-form failure reported by a field extractor.
    #[error("{message}")]
    Extractor { kind: ErrorKind, message: String },
}

impl ExtractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::Io { .. } | ExtractError::DeadlineExceeded(_) => ErrorKind::TransientIo,
            ExtractError::Malformed { .. }
            | ExtractError::Unsupported(_)
            | ExtractError::NotFound { .. } => ErrorKind::PermanentFormat,
            ExtractError::ResourceExhausted(_) => ErrorKind::ResourceExhaustion,
            ExtractError::Cancelled => ErrorKind::Cancelled,
            ExtractError::Panicked(_) => ErrorKind::Internal,
            ExtractError::Extractor { kind, .. } => *kind,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn malformed(format: impl Into<String>, message: impl Into<String>) -> Self {
        ExtractError::Malformed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        ExtractError::Extractor {
            kind: ErrorKind::TransientIo,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ExtractError::Extractor {
            kind: ErrorKind::PermanentFormat,
            message: message.into(),
        }
    }
}

impl From<io::Error> for ExtractError {
    fn from(err: io::Error) -> Self {
        ExtractError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_drive_retryability() {
        let io: ExtractError = io::Error::new(io::ErrorKind::TimedOut, "slow disk").into();
        assert_eq!(io.kind(), ErrorKind::TransientIo);
        assert!(io.is_retryable());

        assert!(ExtractError::DeadlineExceeded(Duration::from_secs(1)).is_retryable());
        assert!(ExtractError::ResourceExhausted("queue full".into()).is_retryable());

        assert!(!ExtractError::malformed("png", "bad crc").is_retryable());
        assert!(!ExtractError::Cancelled.is_retryable());
        assert!(!ExtractError::Panicked("boom".into()).is_retryable());
        assert_eq!(
            ExtractError::permanent("nope").kind(),
            ErrorKind::PermanentFormat
        );
    }

    #[test]
    fn io_errors_keep_their_message() {
        let err: ExtractError = io::Error::new(io::ErrorKind::UnexpectedEof, "short read").into();
        assert!(err.to_string().contains("short read"));
    }
}
