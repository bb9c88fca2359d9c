//! Region-aware routing.
//!
//! Reads prefer the region closest to the client and fall back across the
//! remaining healthy replicas by latency, ending with one last attempt on
//! the primary. Writes always go to the primary and are never retried.
//! Region health is refreshed by a periodic `SELECT 1` probe.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use examforge_core::{
    with_timeout, ClientContext, PeriodicTask, ReadOptions, Region, RegionId, SharedClock,
};
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::error::{Result, StorageError};
use crate::geo;
use crate::pool::{ConnectionHandle, ConnectionPool};

/// Published after every successful write; replicas are expected to catch up.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReplicationNotice {
    pub operation: String,
    pub region: RegionId,
    pub committed_at: DateTime<Utc>,
}

pub struct RegionRouter {
    regions: DashMap<RegionId, Region>,
    primary: RegionId,
    pool: Arc<ConnectionPool>,
    config: RouterConfig,
    query_timeout: Duration,
    clock: SharedClock,
    replication: broadcast::Sender<ReplicationNotice>,
    probes: Mutex<Option<PeriodicTask>>,
}

impl std::fmt::Debug for RegionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionRouter")
            .field("primary", &self.primary)
            .field("regions", &self.regions.len())
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

impl RegionRouter {
    /// Builds the region table from the pool's settings. Every region starts
    /// healthy; the first probe corrects that.
    pub fn new(
        pool: Arc<ConnectionPool>,
        config: RouterConfig,
        query_timeout: Duration,
        clock: SharedClock,
    ) -> Result<Self> {
        let settings = pool.settings();
        settings.validate()?;
        let primary = settings.primary()?.id.clone();

        let regions = DashMap::new();
        for region in &settings.regions {
            regions.insert(
                region.id.clone(),
                Region::new(region.id.clone(), region.name.clone(), region.is_primary),
            );
        }

        let (replication, _) = broadcast::channel(config.replication_channel_capacity.max(1));

        Ok(Self {
            regions,
            primary,
            pool,
            config,
            query_timeout,
            clock,
            replication,
            probes: Mutex::new(None),
        })
    }

    pub fn primary(&self) -> &RegionId {
        &self.primary
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Snapshot of the region table, ordered by id.
    pub fn regions(&self) -> Vec<Region> {
        let mut regions: Vec<Region> = self.regions.iter().map(|r| r.value().clone()).collect();
        regions.sort_by(|a, b| a.id.cmp(&b.id));
        regions
    }

    pub fn region(&self, id: &RegionId) -> Option<Region> {
        self.regions.get(id).map(|r| r.value().clone())
    }

    pub fn subscribe_replication(&self) -> broadcast::Receiver<ReplicationNotice> {
        self.replication.subscribe()
    }

    /// Maps the client's country, else timezone, to a configured region.
    /// Anything unmapped or unconfigured goes to the primary.
    pub fn select_preferred_region(&self, context: &ClientContext) -> RegionId {
        let mapped = context
            .country
            .as_deref()
            .and_then(geo::region_for_country)
            .or_else(|| context.timezone.as_deref().and_then(geo::region_for_timezone));

        match mapped.map(RegionId::new) {
            Some(region) if self.regions.contains_key(&region) => region,
            _ => self.primary.clone(),
        }
    }

    /// Regions to try for a read, in order. The primary's last-resort attempt
    /// is not included.
    pub async fn read_candidates(&self, context: &ClientContext, options: ReadOptions) -> Vec<RegionId> {
        if !options.allow_stale {
            return Vec::new();
        }

        let environment = self.pool.environment().await;
        let now = self.clock.now();
        let max_stale = options
            .max_stale_seconds
            .or(Some(environment.default_max_stale_seconds()));
        let ceiling = self.config.latency_ceiling_ms(environment);
        let usable = |region: &Region| region.healthy && (region.is_primary || region.is_fresh(now, max_stale));

        let preferred = self.select_preferred_region(context);
        let mut candidates = Vec::with_capacity(self.regions.len());
        if let Some(region) = self.regions.get(&preferred) {
            if usable(region.value()) && region.latency_estimate_ms < ceiling {
                candidates.push(preferred.clone());
            }
        }

        // A slow but healthy preferred region still takes its turn by latency.
        let mut rest: Vec<(f64, RegionId)> = self
            .regions
            .iter()
            .filter(|r| !candidates.contains(r.key()) && usable(r.value()))
            .map(|r| (r.latency_estimate_ms, r.key().clone()))
            .collect();
        rest.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        candidates.extend(rest.into_iter().map(|(_, id)| id));

        candidates
    }

    /// Runs a read against the best available region.
    ///
    /// With `allow_stale: false` the read goes straight to the primary.
    /// Configuration and validation errors stop the fallback immediately.
    pub async fn route_read<T, F, Fut>(
        &self,
        operation: &str,
        context: &ClientContext,
        options: ReadOptions,
        op: F,
    ) -> Result<T>
    where
        F: Fn(ConnectionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let candidates = self.read_candidates(context, options).await;
        let mut attempted = Vec::with_capacity(candidates.len() + 1);

        for region in candidates {
            attempted.push(region.clone());
            match self.attempt(operation, &region, &op).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(operation, region = %region, error = %e, "Read failed, trying next region");
                }
            }
        }

        attempted.push(self.primary.clone());
        match self.attempt(operation, &self.primary, &op).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(operation, attempted = ?attempted, error = %e, "Read failed in every region");
                Err(StorageError::AllRegionsUnavailable {
                    attempted,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Runs a write on the primary and announces it to replication listeners.
    pub async fn route_write<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnOnce(ConnectionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let environment = self.pool.environment().await;
        let handle = self.pool.acquire(environment, Some(&self.primary)).await?;

        match with_timeout(operation, self.query_timeout, op(handle)).await {
            Ok(value) => {
                let notice = ReplicationNotice {
                    operation: operation.to_string(),
                    region: self.primary.clone(),
                    committed_at: self.clock.now(),
                };
                // No receivers is fine; nobody is waiting on replicas.
                let _ = self.replication.send(notice);
                Ok(value)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(operation, region = %self.primary, error = %e, "Write failed");
                Err(StorageError::WriteFailed {
                    region: self.primary.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn attempt<T, F, Fut>(&self, operation: &str, region: &RegionId, op: &F) -> Result<T>
    where
        F: Fn(ConnectionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let environment = self.pool.environment().await;
        let handle = self.pool.acquire(environment, Some(region)).await?;
        let result = with_timeout(operation, self.query_timeout, op(handle)).await;
        if result.is_ok() {
            debug!(operation, region = %region, "Read served");
        }
        result
    }

    /// Probes every region concurrently and updates the health table.
    pub async fn probe_health(&self) -> Vec<Region> {
        let environment = self.pool.environment().await;
        let ids: Vec<RegionId> = self.regions.iter().map(|r| r.key().clone()).collect();

        let probes = ids.into_iter().map(|region| async move {
            let started = Instant::now();
            let outcome = match self.pool.acquire(environment, Some(&region)).await {
                Ok(handle) => {
                    with_timeout("health_probe", self.query_timeout, async {
                        sqlx::query("SELECT 1")
                            .execute(handle.db())
                            .await
                            .map_err(StorageError::from)
                    })
                    .await
                }
                Err(e) => Err(e),
            };
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            (region, outcome.map(|_| latency_ms))
        });

        for (region, outcome) in join_all(probes).await {
            match outcome {
                Ok(latency_ms) => self.record_probe(&region, true, Some(latency_ms)),
                Err(e) => {
                    warn!(region = %region, error = %e, "Health probe failed");
                    self.record_probe(&region, false, None);
                }
            }
        }

        self.regions()
    }

    /// Records a probe result for one region. Unknown regions are ignored.
    pub fn record_probe(&self, region: &RegionId, healthy: bool, latency_ms: Option<f64>) {
        let now = self.clock.now();
        if let Some(mut entry) = self.regions.get_mut(region) {
            if entry.healthy != healthy {
                info!(region = %region, healthy, "Region health changed");
            }
            entry.record_probe(healthy, latency_ms, now);
        }
    }

    /// Starts the periodic health probe, replacing any running one.
    pub async fn start_health_probes(self: &Arc<Self>) {
        let router = Arc::downgrade(self);
        let task = PeriodicTask::spawn("region-health-probe", self.config.probe_interval(), move || {
            let router = router.clone();
            async move {
                if let Some(router) = router.upgrade() {
                    router.probe_health().await;
                }
            }
        });

        let previous = self.probes.lock().await.replace(task);
        if let Some(previous) = previous {
            previous.stop().await;
        }
    }

    pub async fn probes_running(&self) -> bool {
        self.probes
            .lock()
            .await
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Stops the health probe and waits for an in-flight probe to finish.
    pub async fn shutdown(&self) {
        let task = self.probes.lock().await.take();
        if let Some(task) = task {
            task.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::connector::SqliteConnector;
    use examforge_core::{ConnectionParams, ConnectionSettings, Environment, ManualClock, RegionConfig};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex as StdMutex;

    fn router(dir: &tempfile::TempDir) -> (Arc<RegionRouter>, Arc<ManualClock>) {
        let mut settings = ConnectionSettings::new(vec![
            RegionConfig::new("iad", "Virginia", true),
            RegionConfig::new("lhr", "London", false),
            RegionConfig::new("nrt", "Tokyo", false),
        ]);
        for region in ["iad", "lhr", "nrt"] {
            let endpoint = format!("sqlite://{}", dir.path().join(format!("{region}.db")).display());
            settings = settings.with_connection(
                Environment::Test,
                region,
                ConnectionParams::new(endpoint).with_auth_token("token"),
            );
        }
        let pool = Arc::new(ConnectionPool::new(
            Environment::Test,
            settings,
            PoolConfig::default(),
            Arc::new(SqliteConnector::new(Duration::from_secs(1))),
        ));
        let clock = ManualClock::starting_now();
        let router = RegionRouter::new(pool, RouterConfig::default(), Duration::from_secs(2), clock.clone())
            .unwrap();
        (Arc::new(router), clock)
    }

    #[tokio::test]
    async fn test_preferred_region_from_country_then_timezone() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir);

        assert_eq!(router.select_preferred_region(&ClientContext::from_country("DE")), RegionId::new("lhr"));
        assert_eq!(
            router.select_preferred_region(&ClientContext::from_timezone("Asia/Tokyo")),
            RegionId::new("nrt")
        );
        // Mapped but not configured here.
        assert_eq!(router.select_preferred_region(&ClientContext::from_country("AU")), RegionId::new("iad"));
        assert_eq!(router.select_preferred_region(&ClientContext::default()), RegionId::new("iad"));
    }

    #[tokio::test]
    async fn test_candidates_skip_unhealthy_and_sort_by_latency() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir);
        router.record_probe(&RegionId::new("iad"), true, Some(80.0));
        router.record_probe(&RegionId::new("nrt"), true, Some(20.0));
        router.record_probe(&RegionId::new("lhr"), false, None);

        let candidates = router
            .read_candidates(&ClientContext::from_country("GB"), ReadOptions::default())
            .await;
        assert_eq!(candidates, vec![RegionId::new("nrt"), RegionId::new("iad")]);
    }

    #[tokio::test]
    async fn test_slow_preferred_region_is_not_tried_first() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir);
        router.record_probe(&RegionId::new("lhr"), true, Some(5_000.0));
        router.record_probe(&RegionId::new("iad"), true, Some(10.0));
        router.record_probe(&RegionId::new("nrt"), true, Some(30.0));

        let candidates = router
            .read_candidates(&ClientContext::from_country("GB"), ReadOptions::default())
            .await;
        assert_eq!(
            candidates,
            vec![RegionId::new("iad"), RegionId::new("nrt"), RegionId::new("lhr")]
        );
    }

    #[tokio::test]
    async fn test_stale_replicas_are_excluded_by_max_stale() {
        let dir = tempfile::tempdir().unwrap();
        let (router, clock) = router(&dir);
        router.record_probe(&RegionId::new("lhr"), true, Some(10.0));
        clock.advance(chrono::Duration::seconds(120));
        router.record_probe(&RegionId::new("iad"), true, Some(50.0));

        let options = ReadOptions::default().with_max_stale(30);
        let candidates = router
            .read_candidates(&ClientContext::from_country("GB"), options)
            .await;
        // nrt was never probed and counts as fresh.
        assert_eq!(candidates, vec![RegionId::new("nrt"), RegionId::new("iad")]);
    }

    #[tokio::test]
    async fn test_read_falls_through_failing_regions() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir);
        let seen = StdMutex::new(Vec::new());

        let value = router
            .route_read("lookup", &ClientContext::from_country("GB"), ReadOptions::default(), |handle| {
                let region = handle.region().clone();
                seen.lock().unwrap().push(region.clone());
                async move {
                    if region.as_str() == "lhr" {
                        Err(StorageError::Database(sqlx::Error::PoolTimedOut))
                    } else {
                        Ok(region)
                    }
                }
            })
            .await
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen[0], RegionId::new("lhr"));
        assert_eq!(seen.len(), 2);
        assert_eq!(value, seen[1]);
    }

    #[tokio::test]
    async fn test_exhausted_read_reports_every_region() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir);

        let err = router
            .route_read("lookup", &ClientContext::default(), ReadOptions::default(), |_| async {
                Err::<(), _>(StorageError::Database(sqlx::Error::PoolTimedOut))
            })
            .await
            .unwrap_err();

        match err {
            StorageError::AllRegionsUnavailable { attempted, .. } => {
                assert_eq!(attempted.len(), 4);
                assert_eq!(attempted.last(), Some(&RegionId::new("iad")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fatal_errors_stop_the_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir);
        let calls = StdMutex::new(0);

        let err = router
            .route_read("lookup", &ClientContext::default(), ReadOptions::default(), |_| {
                *calls.lock().unwrap() += 1;
                async { Err::<(), _>(StorageError::Validation("bad".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Validation(_)));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_primary_only_reads() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir);

        let region = router
            .route_read(
                "lookup",
                &ClientContext::from_country("JP"),
                ReadOptions::primary_only(),
                |handle| async move { Ok(handle.region().clone()) },
            )
            .await
            .unwrap();
        assert_eq!(region, RegionId::new("iad"));
    }

    #[tokio::test]
    async fn test_write_goes_to_primary_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir);
        let mut notices = router.subscribe_replication();

        let region = router
            .route_write("insert", |handle| async move { Ok(handle.region().clone()) })
            .await
            .unwrap();
        assert_eq!(region, RegionId::new("iad"));

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.operation, "insert");
        assert_eq!(notice.region, RegionId::new("iad"));
    }

    #[tokio::test]
    async fn test_failed_write_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir);
        let mut notices = router.subscribe_replication();

        let err = router
            .route_write("insert", |_| async {
                Err::<(), _>(StorageError::Database(sqlx::Error::PoolTimedOut))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::WriteFailed { .. }));
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_probe_marks_regions_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir);
        router.record_probe(&RegionId::new("nrt"), false, None);

        let regions = router.probe_health().await;
        assert_eq!(regions.len(), 3);
        assert!(regions.iter().all(|r| r.healthy && r.last_probed_at.is_some()));
    }

    #[tokio::test]
    async fn test_probe_task_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir);

        router.start_health_probes().await;
        assert!(router.probes_running().await);
        router.shutdown().await;
        assert!(!router.probes_running().await);
    }
}
