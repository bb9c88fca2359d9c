//! Edge key-value tier abstraction.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use examforge_core::{system_clock, SharedClock};
use std::fmt::Debug;

/// String-keyed store with optional per-key TTL and metadata.
///
/// No transactions and no consistency guarantee relative to the memory tier.
#[async_trait]
pub trait EdgeKvStore: Send + Sync + Debug {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(
        &self,
        key: &str,
        value: String,
        ttl_seconds: Option<u64>,
        metadata: Option<serde_json::Value>,
    ) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Short provider name for logs.
    fn provider(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct KvRecord {
    value: String,
    expires_at: Option<DateTime<Utc>>,
    metadata: Option<serde_json::Value>,
}

/// Process-local [`EdgeKvStore`] used in development and tests.
#[derive(Debug)]
pub struct InMemoryKvStore {
    records: DashMap<String, KvRecord>,
    clock: SharedClock,
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Number of stored keys, expired or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn metadata(&self, key: &str) -> Option<serde_json::Value> {
        self.records.get(key).and_then(|record| record.metadata.clone())
    }

    fn live(&self, record: &KvRecord) -> bool {
        record.expires_at.map_or(true, |at| self.clock.now() <= at)
    }
}

#[async_trait]
impl EdgeKvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .records
            .get(key)
            .and_then(|record| self.live(&record).then(|| record.value.clone()));
        if value.is_none() {
            self.records.remove_if(key, |_, record| !self.live(record));
        }
        Ok(value)
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        ttl_seconds: Option<u64>,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        let expires_at = ttl_seconds
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| self.clock.now() + Duration::seconds(secs));
        self.records.insert(
            key.to_string(),
            KvRecord {
                value,
                expires_at,
                metadata,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.records.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .records
            .iter()
            .filter(|record| record.key().starts_with(prefix) && self.live(record.value()))
            .map(|record| record.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn provider(&self) -> &'static str {
        "memory"
    }
}
