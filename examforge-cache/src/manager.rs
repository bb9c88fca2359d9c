//! Two-tier cache facade.

use crate::codec::{decode, encode, EncodedValue, Envelope};
use crate::config::{CacheConfig, CacheOptions};
use crate::error::Result;
use crate::key::{CacheKey, EntityRef};
use crate::kv::EdgeKvStore;
use crate::memory::{MemoryTier, NewEntry};
use crate::stats::CacheStats;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use examforge_core::{system_clock, with_timeout, PeriodicTask, SharedClock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const LOOKUP_METRIC: &str = "examforge_cache_lookups_total";
const GENERATION_SLOTS: usize = 1024;

#[derive(Debug, Clone, Copy)]
enum Lookup {
    MemoryHit,
    RemoteHit,
    Miss,
}

impl Lookup {
    fn as_str(self) -> &'static str {
        match self {
            Lookup::MemoryHit => "memory_hit",
            Lookup::RemoteHit => "remote_hit",
            Lookup::Miss => "miss",
        }
    }
}

/// Invalidation counters covering one key at one point in time.
///
/// Taken before a fetch and compared by [`CacheManager::set_if_current`], so a
/// value read before an invalidation is never cached after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

/// Striped invalidation counters. Names sharing a slot only cause a
/// skipped write, never a stale one.
struct Generations {
    epoch: AtomicU64,
    slots: Vec<AtomicU64>,
}

impl Generations {
    fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            slots: (0..GENERATION_SLOTS).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn slot(&self, name: &str) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        &self.slots[(hasher.finish() as usize) % self.slots.len()]
    }

    fn bump(&self, name: &str) {
        self.slot(name).fetch_add(1, Ordering::SeqCst);
    }

    fn bump_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn current(&self, key: &CacheKey) -> Generation {
        let mut total = self
            .epoch
            .load(Ordering::SeqCst)
            .wrapping_add(self.slot(&key.to_string()).load(Ordering::SeqCst));
        for entity in key.entities() {
            total = total.wrapping_add(self.slot(&entity.to_string()).load(Ordering::SeqCst));
        }
        Generation(total)
    }
}

struct Inner {
    config: CacheConfig,
    memory: MemoryTier,
    remote: Option<Arc<dyn EdgeKvStore>>,
    clock: SharedClock,
    refreshing: DashMap<String, ()>,
    generations: Generations,
    memory_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
}

/// Memory tier in front of an optional edge KV tier.
///
/// Lookups check memory, then the edge tier (backfilling memory on a hit).
/// Edge failures are logged and never reach the caller. Expiry is decided by
/// the clock on every read, independent of the cleanup ticker.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.inner.config)
            .field("remote", &self.inner.remote.as_ref().map(|r| r.provider()))
            .field("entries", &self.inner.memory.len())
            .finish()
    }
}

pub struct CacheManagerBuilder {
    config: CacheConfig,
    remote: Option<Arc<dyn EdgeKvStore>>,
    clock: Option<SharedClock>,
}

impl CacheManagerBuilder {
    pub fn remote(mut self, store: Arc<dyn EdgeKvStore>) -> Self {
        self.remote = Some(store);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<CacheManager> {
        self.config.validate()?;
        Ok(CacheManager {
            inner: Arc::new(Inner {
                memory: MemoryTier::new(self.config.memory_budget_bytes),
                config: self.config,
                remote: self.remote,
                clock: self.clock.unwrap_or_else(system_clock),
                refreshing: DashMap::new(),
                generations: Generations::new(),
                memory_hits: AtomicU64::new(0),
                remote_hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        })
    }
}

impl CacheManager {
    pub fn builder(config: CacheConfig) -> CacheManagerBuilder {
        CacheManagerBuilder {
            config,
            remote: None,
            clock: None,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn has_remote(&self) -> bool {
        self.inner.remote.is_some()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.lookup(key).await.map(|(value, _)| value)
    }

    /// Writes both tiers independently; an edge failure leaves the memory write in place.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T, options: CacheOptions) {
        let encoded = match encode(value, self.inner.config.compression_threshold_bytes) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to encode cache value");
                return;
            }
        };
        self.store(key, encoded, self.inner.clock.now(), options).await;
    }

    /// Current invalidation generation of `key` and every entity it depends on.
    pub fn generation(&self, key: &CacheKey) -> Generation {
        self.inner.generations.current(key)
    }

    /// Like [`CacheManager::set`], but only when nothing covering `key` was
    /// invalidated since `seen` was taken. Returns whether the value was kept.
    pub async fn set_if_current<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        options: CacheOptions,
        seen: Generation,
    ) -> bool {
        if self.generation(key) != seen {
            debug!(key = %key, "skipping cache write invalidated during fetch");
            return false;
        }
        self.set(key, value, options).await;

        // An invalidation that raced the write above may have missed it.
        if self.generation(key) != seen {
            self.delete(key).await;
            debug!(key = %key, "dropped cache write invalidated during store");
            return false;
        }
        true
    }

    /// Returns the cached value, fetching and caching it on a miss.
    ///
    /// A hit older than `refresh_threshold` of its memory TTL is returned
    /// immediately while `fetcher` runs in the background to replace it; at
    /// most one refresh per key is in flight. Concurrent misses on the same
    /// key are not coalesced and may each call their fetcher. A fetch that
    /// overlaps an invalidation of the key is returned but not cached.
    ///
    /// With `fetch_fresh` the lookup is skipped and the fetched value
    /// replaces whatever was cached.
    pub async fn get_or_set<T, F, Fut, E>(
        &self,
        key: &CacheKey,
        fetcher: F,
        options: CacheOptions,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        if !options.fetch_fresh {
            if let Some((value, created_at)) = self.lookup::<T>(key).await {
                if self.needs_refresh(created_at, &options) {
                    self.spawn_refresh(key.clone(), fetcher, options);
                }
                return Ok(value);
            }
        }

        let seen = self.generation(key);
        let value = fetcher().await?;
        self.set_if_current(key, &value, options, seen).await;
        Ok(value)
    }

    pub async fn delete(&self, key: &CacheKey) {
        let rendered = key.to_string();
        self.inner.generations.bump(&rendered);
        self.inner.memory.remove(&rendered);
        if let Some(remote) = &self.inner.remote {
            self.remote_call("kv.delete", remote.delete(&rendered)).await;
        }
    }

    /// Drops every key owned by or depending on `entity`.
    ///
    /// The memory tier resolves keys through the entity index; the edge tier
    /// deletes the entity's key prefix plus any indexed dependents.
    pub async fn invalidate_entity(&self, entity: &EntityRef) -> usize {
        self.inner.generations.bump(&entity.to_string());
        let keys = self.inner.memory.keys_for_entity(&entity.to_string());
        let removed = keys
            .iter()
            .filter(|key| self.inner.memory.remove(key))
            .count();

        if let Some(remote) = &self.inner.remote {
            let mut remote_keys: BTreeSet<String> = keys.into_iter().collect();
            if let Some(listed) = self
                .remote_call("kv.list", remote.list(&entity.key_prefix()))
                .await
            {
                remote_keys.extend(listed);
            }
            for key in &remote_keys {
                self.remote_call("kv.delete", remote.delete(key)).await;
            }
        }

        debug!(entity = %entity, removed, "invalidated cache entity");
        removed
    }

    /// Linear scan over memory keys containing `pattern`; the edge tier
    /// deletes keys listed under `pattern` as a prefix.
    ///
    /// Meant for rare bulk invalidation, prefer [`CacheManager::invalidate_entity`].
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        self.inner.generations.bump_all();
        let removed = self
            .inner
            .memory
            .keys_containing(pattern)
            .iter()
            .filter(|key| self.inner.memory.remove(key))
            .count();

        if let Some(remote) = &self.inner.remote {
            if let Some(keys) = self.remote_call("kv.list", remote.list(pattern)).await {
                for key in &keys {
                    self.remote_call("kv.delete", remote.delete(key)).await;
                }
            }
        }

        debug!(pattern, removed, "invalidated cache pattern");
        removed
    }

    pub fn purge_expired(&self) -> usize {
        self.inner.memory.purge_expired(self.inner.clock.now())
    }

    /// Starts the cancellable expiry sweep.
    pub fn start_cleanup(&self) -> PeriodicTask {
        let cache = self.clone();
        PeriodicTask::spawn(
            "cache-cleanup",
            self.inner.config.cleanup_interval(),
            move || {
                let cache = cache.clone();
                async move {
                    let purged = cache.purge_expired();
                    if purged > 0 {
                        debug!(purged, "purged expired cache entries");
                    }
                }
            },
        )
    }

    pub fn stats(&self) -> CacheStats {
        let memory_hits = self.inner.memory_hits.load(Ordering::Relaxed);
        let remote_hits = self.inner.remote_hits.load(Ordering::Relaxed);
        let mut stats = CacheStats {
            hits: memory_hits + remote_hits,
            misses: self.inner.misses.load(Ordering::Relaxed),
            memory_hits,
            remote_hits,
            evictions: self.inner.memory.evictions(),
            expirations: self.inner.memory.expirations(),
            entries: self.inner.memory.len(),
            memory_bytes: self.inner.memory.used_bytes(),
            memory_budget_bytes: self.inner.memory.budget_bytes(),
            hit_rate: 0.0,
        };
        stats.calculate_hit_rate();
        stats
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<(T, DateTime<Utc>)> {
        let rendered = key.to_string();
        let now = self.inner.clock.now();

        if let Some(hit) = self.inner.memory.get(&rendered, now) {
            match decode::<T>(&hit.value) {
                Ok(value) => {
                    self.count(Lookup::MemoryHit);
                    return Some((value, hit.created_at));
                }
                Err(e) => {
                    warn!(key = %rendered, error = %e, "dropping undecodable memory entry");
                    self.inner.memory.remove(&rendered);
                }
            }
        }

        if let Some((encoded, created_at)) = self.remote_get(&rendered).await {
            match decode::<T>(&encoded) {
                Ok(value) => {
                    let expires_at = now + chrono_duration(self.inner.config.default_memory_ttl());
                    self.inner.memory.insert(
                        NewEntry {
                            key: rendered,
                            value: encoded,
                            entities: entity_names(key),
                            created_at,
                            expires_at,
                        },
                        now,
                    );
                    self.count(Lookup::RemoteHit);
                    return Some((value, created_at));
                }
                Err(e) => warn!(key = %rendered, error = %e, "ignoring undecodable edge entry"),
            }
        }

        self.count(Lookup::Miss);
        None
    }

    async fn remote_get(&self, key: &str) -> Option<(EncodedValue, DateTime<Utc>)> {
        let remote = self.inner.remote.as_ref()?;
        let raw = self.remote_call("kv.get", remote.get(key)).await??;
        match Envelope::unwrap(&raw) {
            Ok(unwrapped) => Some(unwrapped),
            Err(e) => {
                warn!(key, error = %e, "malformed edge cache envelope");
                None
            }
        }
    }

    async fn store(
        &self,
        key: &CacheKey,
        encoded: EncodedValue,
        created_at: DateTime<Utc>,
        options: CacheOptions,
    ) {
        let rendered = key.to_string();
        let now = self.inner.clock.now();
        let memory_ttl = options
            .memory_ttl
            .unwrap_or_else(|| self.inner.config.default_memory_ttl());

        let remote_payload = match (&self.inner.remote, options.memory_only) {
            (Some(_), false) => match Envelope::wrap(&encoded, created_at) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    warn!(key = %rendered, error = %e, "failed to wrap edge cache value");
                    None
                }
            },
            _ => None,
        };

        self.inner.memory.insert(
            NewEntry {
                key: rendered.clone(),
                value: encoded,
                entities: entity_names(key),
                created_at,
                expires_at: now + chrono_duration(memory_ttl),
            },
            now,
        );

        if let (Some(remote), Some(raw)) = (&self.inner.remote, remote_payload) {
            let kv_ttl = options
                .kv_ttl
                .unwrap_or_else(|| self.inner.config.default_kv_ttl());
            let metadata = serde_json::json!({ "entities": entity_names(key) });
            self.remote_call(
                "kv.put",
                remote.put(&rendered, raw, Some(kv_ttl.as_secs()), Some(metadata)),
            )
            .await;
        }
    }

    fn needs_refresh(&self, created_at: DateTime<Utc>, options: &CacheOptions) -> bool {
        let memory_ttl = options
            .memory_ttl
            .unwrap_or_else(|| self.inner.config.default_memory_ttl());
        let threshold = options
            .refresh_threshold
            .unwrap_or(self.inner.config.refresh_threshold);
        let age_ms = (self.inner.clock.now() - created_at).num_milliseconds();
        age_ms as f64 > memory_ttl.as_millis() as f64 * threshold
    }

    fn spawn_refresh<T, F, Fut, E>(&self, key: CacheKey, fetcher: F, options: CacheOptions)
    where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let rendered = key.to_string();
        match self.inner.refreshing.entry(rendered.clone()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let seen = self.generation(&key);
        let cache = self.clone();
        tokio::spawn(async move {
            match fetcher().await {
                Ok(value) => {
                    if cache.set_if_current(&key, &value, options, seen).await {
                        debug!(key = %rendered, "refreshed cache entry in background");
                    }
                }
                Err(e) => warn!(key = %rendered, error = %e, "background cache refresh failed"),
            }
            cache.inner.refreshing.remove(&rendered);
        });
    }

    async fn remote_call<T, F>(&self, operation: &str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result: Result<T> =
            with_timeout(operation, self.inner.config.remote_timeout(), call).await;
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                let provider = self.inner.remote.as_ref().map_or("none", |r| r.provider());
                warn!(operation, provider, error = %e, "edge cache call failed, continuing with memory tier");
                None
            }
        }
    }

    fn count(&self, lookup: Lookup) {
        let counter = match lookup {
            Lookup::MemoryHit => &self.inner.memory_hits,
            Lookup::RemoteHit => &self.inner.remote_hits,
            Lookup::Miss => &self.inner.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(LOOKUP_METRIC, "result" => lookup.as_str()).increment(1);
    }
}

fn entity_names(key: &CacheKey) -> Vec<String> {
    key.entities().map(ToString::to_string).collect()
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::seconds(300))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;
    use examforge_core::ManualClock;
    use pretty_assertions::assert_eq;

    fn key(id: &str) -> CacheKey {
        CacheKey::new(EntityRef::new("exam", id), "summary")
    }

    fn manager(clock: Arc<ManualClock>, remote: Option<Arc<InMemoryKvStore>>) -> CacheManager {
        let mut builder = CacheManager::builder(
            CacheConfig::builder()
                .default_memory_ttl(Duration::from_secs(60))
                .build()
                .unwrap(),
        )
        .clock(clock);
        if let Some(remote) = remote {
            builder = builder.remote(remote);
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = manager(ManualClock::starting_now(), None);
        cache.set(&key("1"), &vec![1, 2, 3], CacheOptions::default()).await;

        let value: Option<Vec<i32>> = cache.get(&key("1")).await;
        assert_eq!(value, Some(vec![1, 2, 3]));
        assert_eq!(cache.stats().memory_hits, 1);
    }

    #[tokio::test]
    async fn test_remote_hit_backfills_memory() {
        let clock = ManualClock::starting_now();
        let remote = Arc::new(InMemoryKvStore::with_clock(clock.clone()));
        let writer = manager(clock.clone(), Some(remote.clone()));
        writer.set(&key("1"), "shared", CacheOptions::default()).await;

        let reader = manager(clock, Some(remote));
        let first: Option<String> = reader.get(&key("1")).await;
        let second: Option<String> = reader.get(&key("1")).await;

        assert_eq!(first.as_deref(), Some("shared"));
        assert_eq!(second.as_deref(), Some("shared"));
        let stats = reader.stats();
        assert_eq!((stats.remote_hits, stats.memory_hits), (1, 1));
    }

    #[tokio::test]
    async fn test_memory_only_skips_remote() {
        let clock = ManualClock::starting_now();
        let remote = Arc::new(InMemoryKvStore::with_clock(clock.clone()));
        let cache = manager(clock, Some(remote.clone()));

        cache
            .set(&key("1"), &1u8, CacheOptions::default().memory_only())
            .await;
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn test_set_if_current_rejects_after_invalidation() {
        let cache = manager(ManualClock::starting_now(), None);
        let user = EntityRef::new("user", "u1");
        let selection = key("1").depends_on(user.clone());

        let seen = cache.generation(&selection);
        cache.invalidate_entity(&user).await;
        assert!(!cache.set_if_current(&selection, "old", CacheOptions::default(), seen).await);
        assert_eq!(cache.get::<String>(&selection).await, None);

        let seen = cache.generation(&selection);
        assert!(cache.set_if_current(&selection, "new", CacheOptions::default(), seen).await);
        assert_eq!(cache.get::<String>(&selection).await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_delete_and_pattern_invalidation_bump_generation() {
        let cache = manager(ManualClock::starting_now(), None);
        let seen = cache.generation(&key("1"));
        cache.delete(&key("1")).await;
        assert_ne!(cache.generation(&key("1")), seen);

        let seen = cache.generation(&key("1"));
        cache.invalidate_by_pattern("exam:").await;
        assert_ne!(cache.generation(&key("1")), seen);
    }

    #[tokio::test]
    async fn test_type_mismatch_reads_as_miss() {
        let cache = manager(ManualClock::starting_now(), None);
        cache.set(&key("1"), "text", CacheOptions::default()).await;

        let value: Option<u64> = cache.get(&key("1")).await;
        assert_eq!(value, None);
        assert_eq!(cache.stats().entries, 0);
    }
}
