//! Configuration for the relational side of the data layer and the
//! composition root that wires it to the cache and the monitor.

use examforge_cache::{CacheConfig, CloudflareKvConfig};
use examforge_core::{ConnectionSettings, Environment};
use examforge_metrics::MonitorConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, StorageError};

/// Sizing for the per-(environment, region) connection handles.
///
/// `max_handles` is a soft limit: exceeding it only logs a warning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub max_handles: usize,
    /// Connections inside each handle's underlying sqlx pool.
    pub connections_per_handle: u32,
    pub min_connections_per_handle: u32,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_handles: 16,
            connections_per_handle: 5,
            min_connections_per_handle: 0,
            acquire_timeout_ms: 5_000,
            idle_timeout_secs: Some(600),
        }
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_handles == 0 {
            return Err(StorageError::Configuration(
                "max_handles must be greater than 0".to_string(),
            ));
        }
        if self.connections_per_handle == 0 {
            return Err(StorageError::Configuration(
                "connections_per_handle must be greater than 0".to_string(),
            ));
        }
        if self.min_connections_per_handle > self.connections_per_handle {
            return Err(StorageError::Configuration(format!(
                "min_connections_per_handle ({}) cannot exceed connections_per_handle ({})",
                self.min_connections_per_handle, self.connections_per_handle
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    max_handles: Option<usize>,
    connections_per_handle: Option<u32>,
    min_connections_per_handle: Option<u32>,
    acquire_timeout: Option<Duration>,
    idle_timeout: Option<Option<Duration>>,
}

impl PoolConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_handles(mut self, max: usize) -> Self {
        self.max_handles = Some(max);
        self
    }

    pub fn connections_per_handle(mut self, connections: u32) -> Self {
        self.connections_per_handle = Some(connections);
        self
    }

    pub fn min_connections_per_handle(mut self, connections: u32) -> Self {
        self.min_connections_per_handle = Some(connections);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<PoolConfig> {
        let default = PoolConfig::default();
        let config = PoolConfig {
            max_handles: self.max_handles.unwrap_or(default.max_handles),
            connections_per_handle: self
                .connections_per_handle
                .unwrap_or(default.connections_per_handle),
            min_connections_per_handle: self
                .min_connections_per_handle
                .unwrap_or(default.min_connections_per_handle),
            acquire_timeout_ms: self
                .acquire_timeout
                .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or(default.acquire_timeout_ms),
            idle_timeout_secs: match self.idle_timeout {
                Some(timeout) => timeout.map(|t| t.as_secs()),
                None => default.idle_timeout_secs,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    pub probe_interval_secs: u64,
    /// Preferred replicas slower than this are skipped. Falls back to the
    /// environment's profile when unset.
    pub latency_ceiling_ms: Option<u64>,
    pub replication_channel_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
            latency_ceiling_ms: None,
            replication_channel_capacity: 256,
        }
    }
}

impl RouterConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn latency_ceiling_ms(&self, environment: Environment) -> f64 {
        self.latency_ceiling_ms
            .unwrap_or_else(|| environment.default_latency_ceiling_ms()) as f64
    }
}

/// Cache lifetimes and batch sizing for the selection engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub selection_ttl_secs: u64,
    pub question_ttl_secs: u64,
    pub leaderboard_ttl_secs: u64,
    /// Rows per multi-row INSERT when recording a batch of answers.
    pub batch_insert_chunk: usize,
    pub search_limit_max: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            selection_ttl_secs: 60,
            question_ttl_secs: 600,
            leaderboard_ttl_secs: 30,
            batch_insert_chunk: 100,
            search_limit_max: 100,
        }
    }
}

impl EngineConfig {
    pub fn selection_ttl(&self) -> Duration {
        Duration::from_secs(self.selection_ttl_secs)
    }

    pub fn question_ttl(&self) -> Duration {
        Duration::from_secs(self.question_ttl_secs)
    }

    pub fn leaderboard_ttl(&self) -> Duration {
        Duration::from_secs(self.leaderboard_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        // SQLite caps bound parameters per statement; one answer row binds 8.
        if self.batch_insert_chunk == 0 || self.batch_insert_chunk > 4_000 {
            return Err(StorageError::Configuration(format!(
                "batch_insert_chunk {} outside 1..=4000",
                self.batch_insert_chunk
            )));
        }
        if self.search_limit_max == 0 {
            return Err(StorageError::Configuration(
                "search_limit_max must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which edge key-value provider backs the remote cache tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum EdgeKvSettings {
    /// Memory tier only.
    #[default]
    Disabled,
    /// Process-local KV; useful for development and tests.
    Memory,
    Cloudflare(CloudflareKvConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLayerConfig {
    pub environment: Environment,
    pub connections: ConnectionSettings,
    pub pool: PoolConfig,
    pub router: RouterConfig,
    pub cache: CacheConfig,
    pub monitor: MonitorConfig,
    pub engine: EngineConfig,
    pub edge_kv: EdgeKvSettings,
    /// Deadline applied to every store operation attempt and health probe.
    pub query_timeout_ms: u64,
}

impl Default for DataLayerConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            connections: ConnectionSettings::default(),
            pool: PoolConfig::default(),
            router: RouterConfig::default(),
            cache: CacheConfig::default(),
            monitor: MonitorConfig::default(),
            engine: EngineConfig::default(),
            edge_kv: EdgeKvSettings::default(),
            query_timeout_ms: 5_000,
        }
    }
}

impl DataLayerConfig {
    pub fn new(environment: Environment, connections: ConnectionSettings) -> Self {
        Self {
            environment,
            connections,
            ..Self::default()
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.connections.validate()?;
        self.pool.validate()?;
        self.engine.validate()?;
        self.cache.validate()?;
        self.monitor.validate()?;
        if self.query_timeout_ms == 0 {
            return Err(StorageError::Configuration(
                "query_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.router.probe_interval_secs == 0 {
            return Err(StorageError::Configuration(
                "probe_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.router.replication_channel_capacity == 0 {
            return Err(StorageError::Configuration(
                "replication_channel_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
