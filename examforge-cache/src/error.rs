use examforge_core::TimeoutError;
use thiserror::Error;

/// Errors raised inside the cache tiers.
///
/// [`crate::CacheManager`] never surfaces these to its callers; they are
/// logged and the operation degrades to the memory tier or a direct fetch.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache configuration: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Edge KV request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Edge KV returned status {status}: {body}")]
    RemoteStatus { status: u16, body: String },

    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Compression(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
