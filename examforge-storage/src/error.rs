use examforge_cache::CacheError;
use examforge_core::{CoreError, RegionId, TimeoutError};
use thiserror::Error;

/// Errors surfaced by the pool, router and selection engine.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Missing or invalid connection configuration. Always fatal.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Every read candidate failed, including the final attempt on the primary.
    #[error("All regions unavailable (tried {attempted:?}): {source}")]
    AllRegionsUnavailable {
        attempted: Vec<RegionId>,
        source: Box<StorageError>,
    },

    /// A write to the primary failed. Writes are never retried.
    #[error("Write to primary region {region} failed: {source}")]
    WriteFailed {
        region: RegionId,
        source: Box<StorageError>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A runtime failure in one of the cache tiers.
    #[error("Cache error: {0}")]
    Cache(#[source] CacheError),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StorageError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Errors that trying another region cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StorageError::Configuration(_) | StorageError::Validation(_) | StorageError::NotFound { .. }
        )
    }
}

impl From<CoreError> for StorageError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Configuration(msg) => StorageError::Configuration(msg),
            CoreError::Validation(msg) | CoreError::InvalidId(msg) => StorageError::Validation(msg),
            CoreError::Serialization(msg) => StorageError::Serialization(msg),
        }
    }
}

impl From<CacheError> for StorageError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Configuration(msg) => StorageError::Configuration(msg),
            other => StorageError::Cache(other),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
