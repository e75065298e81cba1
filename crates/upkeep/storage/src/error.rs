use thiserror::Error;
use upkeep_types::UpkeepError;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for UpkeepError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(msg) => Self::NotFound(msg),
            StorageError::Conflict(msg) | StorageError::InvariantViolation(msg) => {
                Self::Conflict(msg)
            }
            StorageError::InvalidInput(msg) => Self::Validation(msg),
            StorageError::Backend(msg) => Self::Backend(msg),
        }
    }
}
