//! Cache configuration and per-call options.

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Total bytes the memory tier may hold across keys and encoded values.
    pub memory_budget_bytes: usize,

    pub default_memory_ttl_secs: u64,

    pub default_kv_ttl_secs: u64,

    /// Fraction of the memory TTL after which a hit triggers a background refresh.
    pub refresh_threshold: f64,

    /// Serialized values larger than this are gzip-compressed.
    pub compression_threshold_bytes: usize,

    pub cleanup_interval_secs: u64,

    /// Deadline for every edge KV call.
    pub remote_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 64 * 1024 * 1024,
            default_memory_ttl_secs: 300,
            default_kv_ttl_secs: 3600,
            refresh_threshold: 0.8,
            compression_threshold_bytes: 1024,
            cleanup_interval_secs: 60,
            remote_timeout_ms: 2000,
        }
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }

    pub fn default_memory_ttl(&self) -> Duration {
        Duration::from_secs(self.default_memory_ttl_secs)
    }

    pub fn default_kv_ttl(&self) -> Duration {
        Duration::from_secs(self.default_kv_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.memory_budget_bytes == 0 {
            return Err(CacheError::Configuration(
                "memory_budget_bytes must be greater than 0".to_string(),
            ));
        }
        if self.default_memory_ttl_secs == 0 {
            return Err(CacheError::Configuration(
                "default_memory_ttl_secs must be greater than 0".to_string(),
            ));
        }
        if !(self.refresh_threshold > 0.0 && self.refresh_threshold <= 1.0) {
            return Err(CacheError::Configuration(
                "refresh_threshold must be within (0, 1]".to_string(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(CacheError::Configuration(
                "cleanup_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for creating CacheConfig instances.
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    memory_budget_bytes: Option<usize>,
    default_memory_ttl: Option<Duration>,
    default_kv_ttl: Option<Duration>,
    refresh_threshold: Option<f64>,
    compression_threshold_bytes: Option<usize>,
    cleanup_interval: Option<Duration>,
    remote_timeout: Option<Duration>,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory_budget_bytes(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = Some(bytes);
        self
    }

    pub fn default_memory_ttl(mut self, ttl: Duration) -> Self {
        self.default_memory_ttl = Some(ttl);
        self
    }

    pub fn default_kv_ttl(mut self, ttl: Duration) -> Self {
        self.default_kv_ttl = Some(ttl);
        self
    }

    pub fn refresh_threshold(mut self, threshold: f64) -> Self {
        self.refresh_threshold = Some(threshold);
        self
    }

    pub fn compression_threshold_bytes(mut self, bytes: usize) -> Self {
        self.compression_threshold_bytes = Some(bytes);
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<CacheConfig, CacheError> {
        let default = CacheConfig::default();
        let config = CacheConfig {
            memory_budget_bytes: self.memory_budget_bytes.unwrap_or(default.memory_budget_bytes),
            default_memory_ttl_secs: self
                .default_memory_ttl
                .map_or(default.default_memory_ttl_secs, |d| d.as_secs()),
            default_kv_ttl_secs: self
                .default_kv_ttl
                .map_or(default.default_kv_ttl_secs, |d| d.as_secs()),
            refresh_threshold: self.refresh_threshold.unwrap_or(default.refresh_threshold),
            compression_threshold_bytes: self
                .compression_threshold_bytes
                .unwrap_or(default.compression_threshold_bytes),
            cleanup_interval_secs: self
                .cleanup_interval
                .map_or(default.cleanup_interval_secs, |d| d.as_secs()),
            remote_timeout_ms: self.remote_timeout.map_or(default.remote_timeout_ms, |d| {
                u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
            }),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Per-call overrides for `set` and `get_or_set`.
///
/// Unset fields fall back to the [`CacheConfig`] defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheOptions {
    pub memory_ttl: Option<Duration>,
    pub kv_ttl: Option<Duration>,
    pub refresh_threshold: Option<f64>,
    /// Skip the edge tier entirely.
    pub memory_only: bool,
    /// `get_or_set` ignores any cached value, always fetches, and replaces it.
    pub fetch_fresh: bool,
}

impl CacheOptions {
    pub fn memory_ttl(mut self, ttl: Duration) -> Self {
        self.memory_ttl = Some(ttl);
        self
    }

    pub fn kv_ttl(mut self, ttl: Duration) -> Self {
        self.kv_ttl = Some(ttl);
        self
    }

    pub fn refresh_threshold(mut self, threshold: f64) -> Self {
        self.refresh_threshold = Some(threshold);
        self
    }

    pub fn memory_only(mut self) -> Self {
        self.memory_only = true;
        self
    }

    pub fn fetch_fresh(mut self) -> Self {
        self.fetch_fresh = true;
        self
    }
}
