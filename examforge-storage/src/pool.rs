//! One logical connection handle per (environment, region).
//!
//! Handles are created lazily on first `acquire` and reused afterwards.
//! The pool serves a single environment at a time: acquiring for another
//! environment closes every existing handle first so nothing leaks across.

use examforge_core::{ConnectionSettings, Environment, RegionId};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::connector::StoreConnector;
use crate::error::Result;

#[derive(Debug)]
struct HandleInner {
    environment: Environment,
    region: RegionId,
    db: SqlitePool,
}

/// Cheap clone of a pooled store connection for one (environment, region).
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    pub fn environment(&self) -> Environment {
        self.inner.environment
    }

    pub fn region(&self) -> &RegionId {
        &self.inner.region
    }

    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub fn is_closed(&self) -> bool {
        self.inner.db.is_closed()
    }

    /// True when both handles were produced by the same `acquire`.
    pub fn same_handle(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HandleStats {
    pub region: RegionId,
    pub connections: u32,
    pub idle: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PoolStats {
    pub environment: Environment,
    pub active: usize,
    pub max: usize,
    pub regions: Vec<HandleStats>,
}

impl PoolStats {
    pub fn utilization_percent(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            self.active as f64 / self.max as f64 * 100.0
        }
    }
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool(environment: {}, active: {}, max: {})",
            self.environment, self.active, self.max
        )
    }
}

#[derive(Debug)]
struct PoolState {
    environment: Environment,
    handles: HashMap<RegionId, ConnectionHandle>,
}

#[derive(Debug)]
pub struct ConnectionPool {
    settings: ConnectionSettings,
    config: PoolConfig,
    connector: Arc<dyn StoreConnector>,
    state: RwLock<PoolState>,
}

impl ConnectionPool {
    pub fn new(
        environment: Environment,
        settings: ConnectionSettings,
        config: PoolConfig,
        connector: Arc<dyn StoreConnector>,
    ) -> Self {
        Self {
            settings,
            config,
            connector,
            state: RwLock::new(PoolState {
                environment,
                handles: HashMap::new(),
            }),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub async fn environment(&self) -> Environment {
        self.state.read().await.environment
    }

    /// Returns the handle for `(environment, region)`, creating it on first use.
    ///
    /// `None` selects the primary region. Missing connection parameters are a
    /// configuration error outside development.
    pub async fn acquire(
        &self,
        environment: Environment,
        region: Option<&RegionId>,
    ) -> Result<ConnectionHandle> {
        let region = match region {
            Some(region) => region.clone(),
            None => self.settings.primary()?.id.clone(),
        };

        {
            let state = self.state.read().await;
            if state.environment == environment {
                if let Some(handle) = state.handles.get(&region) {
                    return Ok(handle.clone());
                }
            }
        }

        let mut state = self.state.write().await;
        if state.environment != environment {
            Self::close_handles(&mut state).await;
            info!(from = %state.environment, to = %environment, "Switched pool environment");
            state.environment = environment;
        }
        if let Some(handle) = state.handles.get(&region) {
            return Ok(handle.clone());
        }

        let params = self.settings.resolve(environment, &region)?;
        let db = self.connector.connect(&params, &self.config)?;
        let handle = ConnectionHandle {
            inner: Arc::new(HandleInner {
                environment,
                region: region.clone(),
                db,
            }),
        };
        state.handles.insert(region.clone(), handle.clone());

        if state.handles.len() > self.config.max_handles {
            warn!(
                active = state.handles.len(),
                max = self.config.max_handles,
                "Connection handle count above configured maximum"
            );
        }
        debug!(%environment, region = %region, endpoint = %params.endpoint, "Created connection handle");

        Ok(handle)
    }

    /// Closes every handle and makes `environment` the active one.
    pub async fn switch_environment(&self, environment: Environment) {
        let mut state = self.state.write().await;
        Self::close_handles(&mut state).await;
        if state.environment != environment {
            info!(from = %state.environment, to = %environment, "Switched pool environment");
        }
        state.environment = environment;
    }

    pub async fn close_all(&self) {
        let mut state = self.state.write().await;
        Self::close_handles(&mut state).await;
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.read().await;
        let mut regions: Vec<HandleStats> = state
            .handles
            .values()
            .map(|handle| HandleStats {
                region: handle.region().clone(),
                connections: handle.db().size(),
                idle: handle.db().num_idle(),
            })
            .collect();
        regions.sort_by(|a, b| a.region.cmp(&b.region));

        PoolStats {
            environment: state.environment,
            active: state.handles.len(),
            max: self.config.max_handles,
            regions,
        }
    }

    async fn close_handles(state: &mut PoolState) {
        if state.handles.is_empty() {
            return;
        }
        let count = state.handles.len();
        for (_, handle) in state.handles.drain() {
            handle.db().close().await;
        }
        info!(environment = %state.environment, count, "Closed connection handles");
    }
}
