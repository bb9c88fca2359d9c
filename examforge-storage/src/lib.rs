//! Relational side of the ExamForge data layer.
//!
//! - [`pool`] -- per-(environment, region) connection handles
//! - [`router`] -- geo-aware read routing, primary-only writes, health probes
//! - [`engine`] -- study question selection and answer recording
//! - [`health`] -- the read-only performance snapshot
//! - [`service`] -- [`DataLayer`], which owns and wires all of the above

pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod geo;
pub mod health;
pub mod pool;
mod queries;
pub mod router;
pub mod schema;
pub mod service;

pub use config::{DataLayerConfig, EdgeKvSettings, EngineConfig, PoolConfig, PoolConfigBuilder, RouterConfig};
pub use connector::{SqliteConnector, StoreConnector};
pub use engine::{NewQuestion, QuerySelectionEngine};
pub use error::{Result, StorageError};
pub use health::{HealthSnapshot, HealthStatus};
pub use pool::{ConnectionHandle, ConnectionPool, HandleStats, PoolStats};
pub use router::{RegionRouter, ReplicationNotice};
pub use service::{DataLayer, DataLayerBuilder};
