use thiserror::Error;

use crate::api::ApiError;

use super::handler::Lifecycle;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize cache entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid partition name: {0}")]
    InvalidName(String),
}

#[derive(Error, Debug)]
pub enum InterceptError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Interceptor cannot activate from state {0:?}; install it first")]
    Lifecycle(Lifecycle),

    #[error("Failed to precache {url}: status {status}")]
    Precache { url: String, status: u16 },

    #[error("Background revalidation did not complete: {0}")]
    Revalidation(#[from] tokio::task::JoinError),
}
