use siphon_core::{ErrorKind, ExtractError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The artifact does not fit even in an empty cache at the current level.
    #[error("artifact of {size_bytes} bytes exceeds effective cache capacity of {effective_capacity} bytes")]
    TooLarge {
        size_bytes: u64,
        effective_capacity: u64,
    },
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::TooLarge { .. } => ErrorKind::ResourceExhaustion,
        }
    }
}

impl From<CacheError> for ExtractError {
    fn from(err: CacheError) -> Self {
        ExtractError::ResourceExhausted(err.to_string())
    }
}
