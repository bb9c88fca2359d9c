//! Operation latency and error tracking for the data layer.
//!
//! - [`monitor`] -- the [`PerformanceMonitor`] ring buffer, alert fan-out and analytics
//! - [`alerting`] -- alert severities, kinds and subscriber callbacks
//! - [`patterns`] -- literal normalization used to group recurring operations
//! - [`stats`] -- percentile and latency summary helpers

pub mod alerting;
pub mod monitor;
pub mod patterns;
pub mod stats;

pub use alerting::{AlertCallback, AlertKind, AlertSeverity, PerformanceAlert};
pub use monitor::{
    Analytics, AnalyticsSummary, MonitorConfig, MonitorConfigBuilder, OperationStats,
    PerformanceMonitor, QueryMetrics, QueryPattern,
};
pub use patterns::normalize_operation;
pub use stats::{percentile, LatencySummary};
