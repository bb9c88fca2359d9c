//! Behavioural tests for the two-tier cache.

use async_trait::async_trait;
use examforge_cache::{
    CacheConfig, CacheError, CacheKey, CacheManager, CacheOptions, EdgeKvStore, EntityRef,
    InMemoryKvStore,
};
use examforge_core::ManualClock;
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StudySet {
    exam: String,
    question_ids: Vec<u32>,
    notes: String,
}

fn study_set(len: u32) -> StudySet {
    StudySet {
        exam: "aws-saa".to_string(),
        question_ids: (0..len).collect(),
        notes: "review objective 2.1 before the next drill".repeat(10),
    }
}

fn exam_key(variant: &str) -> CacheKey {
    CacheKey::new(EntityRef::new("exam", "e1"), variant)
}

fn config() -> CacheConfig {
    CacheConfig::builder()
        .default_memory_ttl(Duration::from_secs(100))
        .refresh_threshold(0.5)
        .compression_threshold_bytes(64)
        .remote_timeout(Duration::from_millis(50))
        .build()
        .unwrap()
}

fn memory_cache(clock: Arc<ManualClock>) -> CacheManager {
    CacheManager::builder(config()).clock(clock).build().unwrap()
}

fn tiered_cache(clock: Arc<ManualClock>, remote: Arc<dyn EdgeKvStore>) -> CacheManager {
    CacheManager::builder(config())
        .clock(clock)
        .remote(remote)
        .build()
        .unwrap()
}

#[derive(Debug)]
struct FailingKvStore;

#[async_trait]
impl EdgeKvStore for FailingKvStore {
    async fn get(&self, _key: &str) -> examforge_cache::Result<Option<String>> {
        Err(unavailable())
    }

    async fn put(
        &self,
        _key: &str,
        _value: String,
        _ttl_seconds: Option<u64>,
        _metadata: Option<serde_json::Value>,
    ) -> examforge_cache::Result<()> {
        Err(unavailable())
    }

    async fn delete(&self, _key: &str) -> examforge_cache::Result<()> {
        Err(unavailable())
    }

    async fn list(&self, _prefix: &str) -> examforge_cache::Result<Vec<String>> {
        Err(unavailable())
    }

    fn provider(&self) -> &'static str {
        "failing"
    }
}

fn unavailable() -> CacheError {
    CacheError::RemoteStatus {
        status: 503,
        body: "unavailable".to_string(),
    }
}

#[derive(Debug)]
struct SlowKvStore;

#[async_trait]
impl EdgeKvStore for SlowKvStore {
    async fn get(&self, _key: &str) -> examforge_cache::Result<Option<String>> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(None)
    }

    async fn put(
        &self,
        _key: &str,
        _value: String,
        _ttl_seconds: Option<u64>,
        _metadata: Option<serde_json::Value>,
    ) -> examforge_cache::Result<()> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(())
    }

    async fn delete(&self, _key: &str) -> examforge_cache::Result<()> {
        Ok(())
    }

    async fn list(&self, _prefix: &str) -> examforge_cache::Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn provider(&self) -> &'static str {
        "slow"
    }
}

async fn wait_for<T, F, Fut>(mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(value) = check().await {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

#[tokio::test]
async fn test_entry_expires_by_clock_without_cleanup() {
    let clock = ManualClock::starting_now();
    let cache = memory_cache(clock.clone());
    let key = exam_key("summary");

    cache
        .set(&key, "cached", CacheOptions::default().memory_ttl(Duration::from_secs(30)))
        .await;

    clock.advance(chrono::Duration::seconds(30));
    assert_eq!(cache.get::<String>(&key).await.as_deref(), Some("cached"));

    clock.advance(chrono::Duration::seconds(1));
    assert_eq!(cache.get::<String>(&key).await, None);
    assert_eq!(cache.stats().expirations, 1);
}

#[tokio::test]
async fn test_get_or_set_fetches_once() {
    let cache = memory_cache(ManualClock::starting_now());
    let calls = Arc::new(AtomicUsize::new(0));
    let key = exam_key("study:abc");

    let mut results = Vec::new();
    for _ in 0..2 {
        let calls = calls.clone();
        let value: Result<StudySet, String> = cache
            .get_or_set(
                &key,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(study_set(5))
                },
                CacheOptions::default(),
            )
            .await;
        results.push(value.unwrap());
    }

    assert_eq!(results[0], results[1]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[tokio::test]
async fn test_fetch_error_propagates_and_caches_nothing() {
    let cache = memory_cache(ManualClock::starting_now());
    let key = exam_key("broken");

    let result: Result<u32, String> = cache
        .get_or_set(&key, || async { Err("store down".to_string()) }, CacheOptions::default())
        .await;

    assert_eq!(result, Err("store down".to_string()));
    assert_eq!(cache.stats().entries, 0);
}

#[tokio::test]
async fn test_stale_hit_returns_immediately_and_refreshes_in_background() {
    let clock = ManualClock::starting_now();
    let cache = memory_cache(clock.clone());
    let key = exam_key("leaderboard");

    let first: Result<String, String> = cache
        .get_or_set(&key, || async { Ok("v1".to_string()) }, CacheOptions::default())
        .await;
    assert_eq!(first.unwrap(), "v1");

    // past 50% of the 100s memory TTL
    clock.advance(chrono::Duration::seconds(60));
    let gate = Arc::new(Notify::new());
    let release = gate.clone();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let gate = gate.clone();
        let calls = calls.clone();
        let stale: Result<String, String> = cache
            .get_or_set(
                &key,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok("v2".to_string())
                },
                CacheOptions::default(),
            )
            .await;
        assert_eq!(stale.unwrap(), "v1");
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    release.notify_one();
    let refreshed = wait_for(|| {
        let cache = cache.clone();
        let key = key.clone();
        async move { cache.get::<String>(&key).await.filter(|v| v == "v2") }
    })
    .await;
    assert_eq!(refreshed, "v2");
}

#[tokio::test]
async fn test_invalidation_during_background_refresh_discards_refresh() {
    let clock = ManualClock::starting_now();
    let cache = memory_cache(clock.clone());
    let user = EntityRef::new("user", "u1");
    let key = exam_key("study:h1").depends_on(user.clone());

    cache.set(&key, "computed-before-answer", CacheOptions::default()).await;
    clock.advance(chrono::Duration::seconds(60));

    let (release, gate) = tokio::sync::oneshot::channel::<()>();
    let started = Arc::new(Notify::new());
    let fetching = started.clone();
    let stale: Result<String, String> = cache
        .get_or_set(
            &key,
            move || async move {
                fetching.notify_one();
                let _ = gate.await;
                Ok("computed-before-answer".to_string())
            },
            CacheOptions::default(),
        )
        .await;
    assert_eq!(stale.unwrap(), "computed-before-answer");
    started.notified().await;

    assert_eq!(cache.invalidate_entity(&user).await, 1);
    release.send(()).unwrap();

    // the refresh task finishes without re-populating the key
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.get::<String>(&key).await, None);

    let fresh: Result<String, String> = cache
        .get_or_set(&key, || async { Ok("after-answer".to_string()) }, CacheOptions::default())
        .await;
    assert_eq!(fresh.unwrap(), "after-answer");
    assert_eq!(cache.get::<String>(&key).await.as_deref(), Some("after-answer"));
}

#[tokio::test]
async fn test_invalidation_during_miss_fetch_returns_value_uncached() {
    let cache = memory_cache(ManualClock::starting_now());
    let user = EntityRef::new("user", "u1");
    let key = exam_key("study:h2").depends_on(user.clone());

    let (release, gate) = tokio::sync::oneshot::channel::<()>();
    let started = Arc::new(Notify::new());
    let fetching = started.clone();
    let pending = {
        let cache = cache.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let result: Result<String, String> = cache
                .get_or_set(
                    &key,
                    move || async move {
                        fetching.notify_one();
                        let _ = gate.await;
                        Ok("old".to_string())
                    },
                    CacheOptions::default(),
                )
                .await;
            result
        })
    };

    started.notified().await;
    cache.invalidate_entity(&user).await;
    release.send(()).unwrap();

    assert_eq!(pending.await.unwrap().unwrap(), "old");
    assert_eq!(cache.get::<String>(&key).await, None);
}

#[tokio::test]
async fn test_fetch_fresh_skips_lookup_and_replaces_entry() {
    let cache = memory_cache(ManualClock::starting_now());
    let key = exam_key("leaderboard");
    cache.set(&key, "cached", CacheOptions::default()).await;

    let fresh: Result<String, String> = cache
        .get_or_set(
            &key,
            || async { Ok("primary".to_string()) },
            CacheOptions::default().fetch_fresh(),
        )
        .await;

    assert_eq!(fresh.unwrap(), "primary");
    assert_eq!(cache.get::<String>(&key).await.as_deref(), Some("primary"));
}

#[tokio::test]
async fn test_remote_failures_degrade_to_memory() {
    let cache = tiered_cache(ManualClock::starting_now(), Arc::new(FailingKvStore));
    let key = exam_key("summary");

    cache.set(&key, &study_set(3), CacheOptions::default()).await;
    assert_eq!(cache.get::<StudySet>(&key).await, Some(study_set(3)));

    let missing: Option<StudySet> = cache.get(&exam_key("other")).await;
    assert_eq!(missing, None);

    let fetched: Result<u32, String> = cache
        .get_or_set(&exam_key("count"), || async { Ok(42) }, CacheOptions::default())
        .await;
    assert_eq!(fetched, Ok(42));
    assert_eq!(cache.invalidate_entity(&EntityRef::new("exam", "e1")).await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_remote_is_bounded_by_timeout() {
    let cache = tiered_cache(ManualClock::starting_now(), Arc::new(SlowKvStore));
    let key = exam_key("summary");

    let started = tokio::time::Instant::now();
    cache.set(&key, "value", CacheOptions::default()).await;
    let value: Option<String> = cache.get(&exam_key("missing")).await;

    assert_eq!(value, None);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(cache.get::<String>(&key).await.as_deref(), Some("value"));
}

#[tokio::test]
async fn test_compressed_values_round_trip_through_both_tiers() {
    let clock = ManualClock::starting_now();
    let remote: Arc<dyn EdgeKvStore> = Arc::new(InMemoryKvStore::with_clock(clock.clone()));
    let writer = tiered_cache(clock.clone(), remote.clone());
    let key = exam_key("study:large");
    let value = study_set(400);

    writer.set(&key, &value, CacheOptions::default()).await;
    assert_eq!(writer.get::<StudySet>(&key).await, Some(value.clone()));

    let reader = tiered_cache(clock, remote);
    assert_eq!(reader.get::<StudySet>(&key).await, Some(value));
    assert_eq!(reader.stats().remote_hits, 1);
}

#[tokio::test]
async fn test_invalidate_entity_follows_dependencies() {
    let clock = ManualClock::starting_now();
    let remote = Arc::new(InMemoryKvStore::with_clock(clock.clone()));
    let cache = tiered_cache(clock.clone(), remote.clone());
    let user = EntityRef::new("user", "u1");

    let selection = exam_key("study:h1").depends_on(user.clone());
    let summary = exam_key("summary");
    let profile = CacheKey::new(user.clone(), "profile");
    cache.set(&selection, &vec![1, 2], CacheOptions::default()).await;
    cache.set(&summary, "summary", CacheOptions::default()).await;

    // written by another node, only reachable through the edge prefix
    let other_node = tiered_cache(clock, remote.clone());
    other_node.set(&profile, "p", CacheOptions::default()).await;

    let removed = cache.invalidate_entity(&user).await;
    assert_eq!(removed, 1);

    assert_eq!(cache.get::<Vec<i32>>(&selection).await, None);
    assert_eq!(cache.get::<String>(&summary).await.as_deref(), Some("summary"));
    assert_eq!(remote.get("user:u1:profile").await.unwrap(), None);
    assert_eq!(remote.get(&selection.to_string()).await.unwrap(), None);
    assert!(remote.get(&summary.to_string()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_invalidate_by_pattern() {
    let clock = ManualClock::starting_now();
    let remote = Arc::new(InMemoryKvStore::with_clock(clock.clone()));
    let cache = tiered_cache(clock, remote.clone());

    cache.set(&exam_key("study:a"), &1, CacheOptions::default()).await;
    cache.set(&exam_key("study:b"), &2, CacheOptions::default()).await;
    cache.set(&exam_key("summary"), &3, CacheOptions::default()).await;

    assert_eq!(cache.invalidate_by_pattern("exam:e1:study").await, 2);
    assert_eq!(remote.list("exam:e1:").await.unwrap(), vec!["exam:e1:summary"]);
    assert_eq!(cache.get::<i32>(&exam_key("summary")).await, Some(3));
}

#[tokio::test]
async fn test_memory_budget_is_respected() {
    let cache = CacheManager::builder(
        CacheConfig::builder()
            .memory_budget_bytes(512)
            .compression_threshold_bytes(4096)
            .build()
            .unwrap(),
    )
    .build()
    .unwrap();

    for i in 0..20 {
        let key = CacheKey::new(EntityRef::new("question", i.to_string()), "body");
        cache.set(&key, &"x".repeat(80), CacheOptions::default()).await;
    }

    let stats = cache.stats();
    assert!(stats.memory_bytes <= stats.memory_budget_bytes);
    assert!(stats.evictions > 0);
    assert!(stats.entries < 20);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_ticker_purges_expired_entries() {
    let clock = ManualClock::starting_now();
    let cache = memory_cache(clock.clone());
    cache
        .set(
            &exam_key("summary"),
            "v",
            CacheOptions::default().memory_ttl(Duration::from_secs(1)),
        )
        .await;
    clock.advance(chrono::Duration::seconds(2));

    let task = cache.start_cleanup();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let stats = cache.stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.expirations, 1);
    task.stop().await;
}
