use siphon_core::{ErrorKind, ExtractError};

/// Why a submission was refused. Nothing was queued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("task queue is full ({capacity} tasks pending)")]
    QueueFull { capacity: usize },

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

impl SubmitError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ResourceExhaustion
    }
}

impl From<SubmitError> for ExtractError {
    fn from(err: SubmitError) -> Self {
        ExtractError::ResourceExhausted(err.to_string())
    }
}
