//! Threshold alerts raised by the performance monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Alert severity levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Investigate soon but not an emergency
    Warning,
    /// Immediate action required
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }

    /// Scales severity by how far `value` is past `threshold`.
    pub fn for_overshoot(value: f64, threshold: f64, critical_multiplier: f64) -> Self {
        if value >= threshold * critical_multiplier {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A single operation exceeded the slow-operation threshold.
    SlowOperation,
    /// The rolling error rate crossed above its threshold.
    ErrorRate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceAlert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub operation: String,
    pub message: String,
    /// Observed value: milliseconds for slow operations, a 0-1 ratio for error rates.
    pub value: f64,
    pub threshold: f64,
    pub raised_at: DateTime<Utc>,
}

/// Subscriber invoked for every alert.
pub type AlertCallback = Arc<dyn Fn(&PerformanceAlert) + Send + Sync>;
