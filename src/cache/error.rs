use thiserror::Error;

use crate::error::{AppError, AppErrorKind, InfrastructureError};

#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis unreachable or the pool could not hand out a connection
    #[error("Cache connection error: {0}")]
    Connection(String),

    #[error("Cache command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("Cache value could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<bb8::RunError<redis::RedisError>> for CacheError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        match err {
            bb8::RunError::User(e) => CacheError::Command(e),
            other => CacheError::Connection(other.to_string()),
        }
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Cache {
            message: err.to_string(),
        }))
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
