use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RegionId;

/// A deployment region of the replicated store.
///
/// Exactly one region is primary; it is the only one that accepts writes.
/// Health fields are mutated only by the periodic probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    pub is_primary: bool,
    pub healthy: bool,
    pub latency_estimate_ms: f64,
    pub last_probed_at: Option<DateTime<Utc>>,
}

impl Region {
    /// A freshly configured region. Regions start optimistically healthy
    /// until the first probe reports otherwise.
    pub fn new(id: RegionId, name: impl Into<String>, is_primary: bool) -> Self {
        Self {
            id,
            name: name.into(),
            is_primary,
            healthy: true,
            latency_estimate_ms: 0.0,
            last_probed_at: None,
        }
    }

    /// Whether the last probe is recent enough for a read that tolerates
    /// at most `max_stale_seconds` of staleness. Never-probed regions count
    /// as fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_stale_seconds: Option<u64>) -> bool {
        match (max_stale_seconds, self.last_probed_at) {
            (Some(limit), Some(probed)) => {
                (now - probed).num_milliseconds() <= (limit as i64).saturating_mul(1000)
            }
            _ => true,
        }
    }

    pub fn record_probe(&mut self, healthy: bool, latency_ms: Option<f64>, at: DateTime<Utc>) {
        self.healthy = healthy;
        if let Some(latency) = latency_ms {
            self.latency_estimate_ms = latency;
        }
        self.last_probed_at = Some(at);
    }
}
