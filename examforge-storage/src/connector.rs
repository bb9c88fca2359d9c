//! Turns resolved connection parameters into a live store handle.

use examforge_core::ConnectionParams;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::PoolConfig;
use crate::error::{Result, StorageError};

/// Creates the store pool behind a connection handle.
///
/// Implementations must not perform I/O here; the first query opens the
/// connection.
pub trait StoreConnector: Send + Sync + fmt::Debug {
    fn connect(&self, params: &ConnectionParams, pool: &PoolConfig) -> Result<SqlitePool>;
}

/// SQLite-dialect connector.
///
/// Replica endpoints are expected as `sqlite:` URLs. The auth token is
/// validated by configuration resolution; local SQLite files have no use
/// for it.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    busy_timeout: Duration,
}

impl SqliteConnector {
    pub fn new(busy_timeout: Duration) -> Self {
        Self { busy_timeout }
    }
}

impl StoreConnector for SqliteConnector {
    fn connect(&self, params: &ConnectionParams, pool: &PoolConfig) -> Result<SqlitePool> {
        if !params.endpoint.starts_with("sqlite:") {
            return Err(StorageError::Configuration(format!(
                "endpoint '{}' is not a sqlite: URL",
                params.endpoint
            )));
        }

        let options = SqliteConnectOptions::from_str(&params.endpoint)
            .map_err(|e| {
                StorageError::Configuration(format!("invalid endpoint '{}': {e}", params.endpoint))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(self.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool.connections_per_handle)
            .min_connections(pool.min_connections_per_handle)
            .acquire_timeout(pool.acquire_timeout())
            .idle_timeout(pool.idle_timeout())
            .connect_lazy_with(options);

        Ok(pool)
    }
}
