//! Read-only performance snapshot with a derived 0-100 score.

use chrono::{DateTime, Utc};
use examforge_cache::CacheStats;
use examforge_core::{Environment, Region};
use examforge_metrics::{Analytics, AnalyticsSummary, OperationStats, QueryPattern};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::pool::PoolStats;

/// End-to-end latency budget per operation.
const LATENCY_BUDGET_MS: f64 = 200.0;
/// Budget for the hot question-retrieval path.
const HOT_PATH_BUDGET_MS: f64 = 50.0;
const HOT_PATH_OPERATION: &str = "get_study_questions";
/// Cache hit rates are only judged after this many lookups.
const MIN_CACHE_LOOKUPS: u64 = 20;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthStatus {
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => HealthStatus::Excellent,
            75..=89 => HealthStatus::Good,
            60..=74 => HealthStatus::Fair,
            40..=59 => HealthStatus::Poor,
            _ => HealthStatus::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Excellent => "excellent",
            HealthStatus::Good => "good",
            HealthStatus::Fair => "fair",
            HealthStatus::Poor => "poor",
            HealthStatus::Critical => "critical",
        }
    }

    /// Whether the service should still report itself as able to serve.
    pub fn is_serving(&self) -> bool {
        !matches!(self, HealthStatus::Critical)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthSnapshot {
    pub generated_at: DateTime<Utc>,
    pub environment: Environment,
    pub score: u8,
    pub status: HealthStatus,
    pub summary: AnalyticsSummary,
    pub operations: BTreeMap<String, OperationStats>,
    pub slow_patterns: Vec<QueryPattern>,
    pub pool: PoolStats,
    pub regions: Vec<Region>,
    pub cache: CacheStats,
    pub recommendations: Vec<String>,
}

impl HealthSnapshot {
    pub fn assess(
        analytics: Analytics,
        pool: PoolStats,
        regions: Vec<Region>,
        cache: CacheStats,
        environment: Environment,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let mut score: f64 = 100.0;
        let mut recommendations = analytics.recommendations;
        let summary = analytics.summary;

        if summary.p95_ms > LATENCY_BUDGET_MS {
            score -= 25.0;
            recommendations.push(format!(
                "p95 latency {:.1}ms exceeds the {LATENCY_BUDGET_MS}ms budget",
                summary.p95_ms
            ));
        } else if summary.p95_ms > LATENCY_BUDGET_MS / 2.0 {
            score -= 10.0;
        }

        if let Some(hot) = analytics.operations.get(HOT_PATH_OPERATION) {
            if hot.p95_ms > HOT_PATH_BUDGET_MS {
                score -= 10.0;
                recommendations.push(format!(
                    "question retrieval p95 {:.1}ms exceeds {HOT_PATH_BUDGET_MS}ms; raise the selection cache TTL or check replica latency",
                    hot.p95_ms
                ));
            }
        }

        score -= (summary.error_rate * 300.0).min(30.0);

        for region in regions.iter().filter(|r| !r.healthy) {
            if region.is_primary {
                score -= 30.0;
                recommendations.push(format!(
                    "primary region {} is unhealthy; writes will fail until it recovers",
                    region.id
                ));
            } else {
                score -= 10.0;
                recommendations.push(format!(
                    "replica {} is unhealthy; reads are falling back to other regions",
                    region.id
                ));
            }
        }

        if cache.lookups() >= MIN_CACHE_LOOKUPS {
            if cache.hit_rate < 0.5 {
                score -= 10.0;
                recommendations.push(format!(
                    "cache hit rate {:.0}% is low; review TTLs and invalidation frequency",
                    cache.hit_rate * 100.0
                ));
            } else if cache.hit_rate < 0.8 {
                score -= 5.0;
            }
        }
        if cache.memory_utilization() > 0.9 {
            recommendations.push(format!(
                "memory cache is {:.0}% full with {} evictions; consider a larger budget",
                cache.memory_utilization() * 100.0,
                cache.evictions
            ));
        }

        if pool.utilization_percent() > 90.0 {
            score -= 5.0;
            recommendations.push(format!(
                "{} of {} connection handles in use",
                pool.active, pool.max
            ));
        }

        let score = score.clamp(0.0, 100.0).round() as u8;
        Self {
            generated_at,
            environment,
            score,
            status: HealthStatus::from_score(score),
            summary,
            operations: analytics.operations,
            slow_patterns: analytics.patterns,
            pool,
            regions,
            cache,
            recommendations,
        }
    }
}
