//! The data layer's composition root.
//!
//! [`DataLayer`] owns the pool, router, cache, monitor and engine. Nothing
//! here is global: construct one per process (or per test) and pass it on.

use examforge_cache::{CacheManager, CloudflareKvStore, EdgeKvStore, InMemoryKvStore};
use examforge_core::{system_clock, Environment, PeriodicTask, SharedClock};
use examforge_metrics::PerformanceMonitor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::{DataLayerConfig, EdgeKvSettings};
use crate::connector::{SqliteConnector, StoreConnector};
use crate::engine::QuerySelectionEngine;
use crate::error::Result;
use crate::health::HealthSnapshot;
use crate::pool::ConnectionPool;
use crate::router::RegionRouter;
use crate::schema;

/// Window the health snapshot summarises.
const HEALTH_WINDOW: Duration = Duration::from_secs(300);

pub struct DataLayerBuilder {
    config: DataLayerConfig,
    clock: Option<SharedClock>,
    connector: Option<Arc<dyn StoreConnector>>,
    kv_store: Option<Arc<dyn EdgeKvStore>>,
}

impl DataLayerBuilder {
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn StoreConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Overrides the edge store chosen by `config.edge_kv`.
    pub fn kv_store(mut self, store: Arc<dyn EdgeKvStore>) -> Self {
        self.kv_store = Some(store);
        self
    }

    pub fn build(self) -> Result<DataLayer> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(system_clock);
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(SqliteConnector::new(config.query_timeout())));

        let kv_store = match self.kv_store {
            Some(store) => Some(store),
            None => match &config.edge_kv {
                EdgeKvSettings::Disabled => None,
                EdgeKvSettings::Memory => {
                    Some(Arc::new(InMemoryKvStore::with_clock(clock.clone())) as Arc<dyn EdgeKvStore>)
                }
                EdgeKvSettings::Cloudflare(cf) => {
                    Some(Arc::new(CloudflareKvStore::new(cf.clone())?) as Arc<dyn EdgeKvStore>)
                }
            },
        };

        let mut cache = CacheManager::builder(config.cache.clone()).clock(clock.clone());
        if let Some(store) = kv_store {
            info!(provider = store.provider(), "Edge cache tier enabled");
            cache = cache.remote(store);
        }
        let cache = cache.build()?;

        let pool = Arc::new(ConnectionPool::new(
            config.environment,
            config.connections.clone(),
            config.pool.clone(),
            connector,
        ));
        let router = Arc::new(RegionRouter::new(
            pool.clone(),
            config.router.clone(),
            config.query_timeout(),
            clock.clone(),
        )?);
        let monitor = Arc::new(PerformanceMonitor::with_clock(config.monitor.clone(), clock.clone()));
        let engine = QuerySelectionEngine::new(
            router.clone(),
            cache.clone(),
            monitor.clone(),
            config.engine.clone(),
            clock.clone(),
        );

        Ok(DataLayer {
            config,
            clock,
            pool,
            router,
            cache,
            monitor,
            engine,
            cache_cleanup: Mutex::new(None),
        })
    }
}

pub struct DataLayer {
    config: DataLayerConfig,
    clock: SharedClock,
    pool: Arc<ConnectionPool>,
    router: Arc<RegionRouter>,
    cache: CacheManager,
    monitor: Arc<PerformanceMonitor>,
    engine: QuerySelectionEngine,
    cache_cleanup: Mutex<Option<PeriodicTask>>,
}

impl std::fmt::Debug for DataLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLayer")
            .field("environment", &self.config.environment)
            .field("router", &self.router)
            .field("cache", &self.cache)
            .finish()
    }
}

impl DataLayer {
    pub fn builder(config: DataLayerConfig) -> DataLayerBuilder {
        DataLayerBuilder {
            config,
            clock: None,
            connector: None,
            kv_store: None,
        }
    }

    pub fn config(&self) -> &DataLayerConfig {
        &self.config
    }

    pub fn engine(&self) -> &QuerySelectionEngine {
        &self.engine
    }

    pub fn router(&self) -> &Arc<RegionRouter> {
        &self.router
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Applies pending migrations on the primary.
    pub async fn migrate(&self) -> Result<()> {
        let environment = self.pool.environment().await;
        let handle = self.pool.acquire(environment, None).await?;
        schema::migrate(handle.db()).await
    }

    /// Starts the region health probe and the cache expiry sweep.
    pub async fn start(&self) {
        self.router.start_health_probes().await;
        let previous = self.cache_cleanup.lock().await.replace(self.cache.start_cleanup());
        if let Some(previous) = previous {
            previous.stop().await;
        }
        info!(environment = %self.config.environment, "Data layer started");
    }

    /// Closes every handle and makes `environment` the active one.
    pub async fn switch_environment(&self, environment: Environment) {
        self.pool.switch_environment(environment).await;
    }

    pub async fn health_snapshot(&self) -> HealthSnapshot {
        let analytics = self.monitor.analytics(HEALTH_WINDOW).await;
        HealthSnapshot::assess(
            analytics,
            self.pool.stats().await,
            self.router.regions(),
            self.cache.stats(),
            self.pool.environment().await,
            self.clock.now(),
        )
    }

    /// Stops background tasks and closes every connection handle.
    pub async fn shutdown(&self) {
        self.router.shutdown().await;
        let cleanup = self.cache_cleanup.lock().await.take();
        if let Some(task) = cleanup {
            task.stop().await;
        }
        self.pool.close_all().await;
        info!("Data layer shut down");
    }
}
