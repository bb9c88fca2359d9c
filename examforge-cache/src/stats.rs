use serde::{Deserialize, Serialize};

/// Point-in-time cache counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    /// Lookups answered by either tier.
    pub hits: u64,
    pub misses: u64,
    pub memory_hits: u64,
    pub remote_hits: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
    pub memory_bytes: usize,
    pub memory_budget_bytes: usize,
    /// Hit rate (0.0 - 1.0).
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn memory_utilization(&self) -> f64 {
        if self.memory_budget_bytes == 0 {
            0.0
        } else {
            self.memory_bytes as f64 / self.memory_budget_bytes as f64
        }
    }

    pub(crate) fn calculate_hit_rate(&mut self) {
        let total = self.lookups();
        self.hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
    }
}
