use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Distributed backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Invalid cache configuration: {0}")]
    Configuration(String),

    #[error("Cache engine has been shut down")]
    ShutDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors reported by a [`DistributedBackend`](crate::cache::distributed::DistributedBackend).
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend is unavailable: {0}")]
    Unavailable(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend error: {0}")]
    Other(String),
}

impl From<BackendError> for CacheError {
    fn from(err: BackendError) -> Self {
        CacheError::BackendUnavailable(err.to_string())
    }
}
