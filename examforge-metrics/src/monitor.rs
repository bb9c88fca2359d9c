//! Bounded operation history with threshold alerts and windowed analytics.

use crate::alerting::{AlertCallback, AlertKind, AlertSeverity, PerformanceAlert};
use crate::patterns::normalize_operation;
use crate::stats::LatencySummary;
use chrono::{DateTime, Utc};
use examforge_core::{system_clock, CoreError, SharedClock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const DURATION_METRIC: &str = "examforge_operation_duration_seconds";
const ERROR_METRIC: &str = "examforge_operation_errors_total";

/// Smallest number of samples the rolling error rate is evaluated over.
const MIN_ERROR_RATE_SAMPLES: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Ring buffer size; the oldest record is dropped once full.
    pub buffer_capacity: usize,
    pub slow_threshold_ms: f64,
    /// A slow sample at or above `slow_threshold_ms * critical_multiplier` is critical.
    pub critical_multiplier: f64,
    /// Number of most recent samples the error rate is computed over.
    pub error_rate_window: usize,
    pub error_rate_threshold: f64,
    /// How many slow queries and patterns analytics reports.
    pub top_patterns: usize,
    /// Mirror every record into the `metrics` facade.
    pub export_metrics: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            slow_threshold_ms: 200.0,
            critical_multiplier: 3.0,
            error_rate_window: 100,
            error_rate_threshold: 0.05,
            top_patterns: 10,
            export_metrics: true,
        }
    }
}

impl MonitorConfig {
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.buffer_capacity == 0 {
            return Err(CoreError::Configuration(
                "monitor buffer_capacity must be greater than zero".to_string(),
            ));
        }
        if !(self.slow_threshold_ms.is_finite() && self.slow_threshold_ms > 0.0) {
            return Err(CoreError::Configuration(
                "monitor slow_threshold_ms must be positive".to_string(),
            ));
        }
        if !(self.critical_multiplier.is_finite() && self.critical_multiplier >= 1.0) {
            return Err(CoreError::Configuration(
                "monitor critical_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.error_rate_window == 0 {
            return Err(CoreError::Configuration(
                "monitor error_rate_window must be greater than zero".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.error_rate_threshold) {
            return Err(CoreError::Configuration(
                "monitor error_rate_threshold must be within [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MonitorConfigBuilder {
    config: MonitorConfig,
}

impl MonitorConfigBuilder {
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self
    }

    pub fn slow_threshold_ms(mut self, threshold: f64) -> Self {
        self.config.slow_threshold_ms = threshold;
        self
    }

    pub fn critical_multiplier(mut self, multiplier: f64) -> Self {
        self.config.critical_multiplier = multiplier;
        self
    }

    pub fn error_rate_window(mut self, window: usize) -> Self {
        self.config.error_rate_window = window;
        self
    }

    pub fn error_rate_threshold(mut self, threshold: f64) -> Self {
        self.config.error_rate_threshold = threshold;
        self
    }

    pub fn top_patterns(mut self, count: usize) -> Self {
        self.config.top_patterns = count;
        self
    }

    pub fn export_metrics(mut self, enabled: bool) -> Self {
        self.config.export_metrics = enabled;
        self
    }

    pub fn build(self) -> Result<MonitorConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// One completed operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryMetrics {
    pub operation: String,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
    pub region: Option<String>,
}

impl QueryMetrics {
    pub fn new(operation: impl Into<String>, duration_ms: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            operation: operation.into(),
            duration_ms,
            timestamp,
            error: None,
            region: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsSummary {
    pub count: usize,
    pub error_count: usize,
    pub error_rate: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OperationStats {
    pub count: usize,
    pub error_count: usize,
    pub error_rate: f64,
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

/// A recurring operation shape, literals replaced by `?`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryPattern {
    pub pattern: String,
    pub count: usize,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub error_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Analytics {
    pub window_ms: u64,
    pub summary: AnalyticsSummary,
    pub operations: BTreeMap<String, OperationStats>,
    pub slow_queries: Vec<QueryMetrics>,
    pub patterns: Vec<QueryPattern>,
    pub recommendations: Vec<String>,
}

/// Records operation latencies into a bounded ring buffer and raises alerts.
///
/// Slow-operation alerts fire for every sample over the threshold. Error-rate
/// alerts are edge-triggered: one alert when the rolling rate crosses above
/// the threshold, re-armed once it falls back to or below it. The rate is
/// only evaluated once the buffer holds enough samples to be meaningful.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    samples: RwLock<VecDeque<QueryMetrics>>,
    subscribers: std::sync::RwLock<Vec<AlertCallback>>,
    error_alert_active: AtomicBool,
    clock: SharedClock,
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("config", &self.config)
            .field("error_alert_active", &self.error_alert_active)
            .finish_non_exhaustive()
    }
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: MonitorConfig, clock: SharedClock) -> Self {
        Self {
            samples: RwLock::new(VecDeque::with_capacity(config.buffer_capacity)),
            config,
            subscribers: std::sync::RwLock::new(Vec::new()),
            error_alert_active: AtomicBool::new(false),
            clock,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Registers an alert subscriber.
    pub fn on_alert<F>(&self, callback: F)
    where
        F: Fn(&PerformanceAlert) + Send + Sync + 'static,
    {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subscribers.push(Arc::new(callback));
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub async fn len(&self) -> usize {
        self.samples.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.samples.read().await.is_empty()
    }

    pub async fn record(&self, metrics: QueryMetrics) {
        if self.config.export_metrics {
            export(&metrics);
        }

        let mut alerts = Vec::new();
        if metrics.duration_ms >= self.config.slow_threshold_ms {
            alerts.push(self.slow_alert(&metrics));
        }

        let error_rate = {
            let mut samples = self.samples.write().await;
            if samples.len() >= self.config.buffer_capacity {
                samples.pop_front();
            }
            samples.push_back(metrics.clone());
            self.rolling_error_rate(&samples)
        };

        if let Some(rate) = error_rate {
            let threshold = self.config.error_rate_threshold;
            if rate > threshold {
                if !self.error_alert_active.swap(true, Ordering::SeqCst) {
                    alerts.push(self.error_rate_alert(&metrics.operation, rate));
                }
            } else {
                self.error_alert_active.store(false, Ordering::SeqCst);
            }
        }

        if !alerts.is_empty() {
            self.dispatch(alerts);
        }
    }

    /// Measures `future` and records its duration and outcome under `operation`.
    pub async fn time<F, T, E>(&self, operation: &str, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let started = Instant::now();
        let result = future.await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut metrics = QueryMetrics::new(operation, duration_ms, self.clock.now());
        if let Err(error) = &result {
            metrics = metrics.with_error(error.to_string());
        }
        self.record(metrics).await;
        result
    }

    /// Computes statistics over records no older than `window`.
    pub async fn analytics(&self, window: Duration) -> Analytics {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| self.clock.now().checked_sub_signed(w));

        let recent: Vec<QueryMetrics> = {
            let samples = self.samples.read().await;
            samples
                .iter()
                .filter(|m| cutoff.map_or(true, |c| m.timestamp >= c))
                .cloned()
                .collect()
        };

        let summary = summarize(&recent);
        let operations = per_operation(&recent);

        let mut slow_queries: Vec<QueryMetrics> = recent
            .iter()
            .filter(|m| m.duration_ms >= self.config.slow_threshold_ms)
            .cloned()
            .collect();
        slow_queries.sort_by(|a, b| b.duration_ms.total_cmp(&a.duration_ms));
        slow_queries.truncate(self.config.top_patterns);

        let patterns = recurring_patterns(&recent, self.config.top_patterns);
        let recommendations = self.recommendations(&summary, &patterns);

        Analytics {
            window_ms,
            summary,
            operations,
            slow_queries,
            patterns,
            recommendations,
        }
    }

    fn rolling_error_rate(&self, samples: &VecDeque<QueryMetrics>) -> Option<f64> {
        let window = self.config.error_rate_window.min(samples.len());
        if window < self.config.error_rate_window.min(MIN_ERROR_RATE_SAMPLES) {
            return None;
        }
        let errors = samples.iter().rev().take(window).filter(|m| m.is_error()).count();
        Some(errors as f64 / window as f64)
    }

    fn slow_alert(&self, metrics: &QueryMetrics) -> PerformanceAlert {
        let threshold = self.config.slow_threshold_ms;
        let severity = AlertSeverity::for_overshoot(
            metrics.duration_ms,
            threshold,
            self.config.critical_multiplier,
        );
        PerformanceAlert {
            kind: AlertKind::SlowOperation,
            severity,
            operation: metrics.operation.clone(),
            message: format!(
                "{} took {:.1}ms (threshold {:.1}ms)",
                metrics.operation, metrics.duration_ms, threshold
            ),
            value: metrics.duration_ms,
            threshold,
            raised_at: self.clock.now(),
        }
    }

    fn error_rate_alert(&self, operation: &str, rate: f64) -> PerformanceAlert {
        let threshold = self.config.error_rate_threshold;
        PerformanceAlert {
            kind: AlertKind::ErrorRate,
            severity: AlertSeverity::for_overshoot(rate, threshold, 2.0),
            operation: operation.to_string(),
            message: format!(
                "error rate {:.1}% over the last {} operations exceeds {:.1}%",
                rate * 100.0,
                self.config.error_rate_window,
                threshold * 100.0
            ),
            value: rate,
            threshold,
            raised_at: self.clock.now(),
        }
    }

    fn dispatch(&self, alerts: Vec<PerformanceAlert>) {
        for alert in &alerts {
            match alert.severity {
                AlertSeverity::Critical => tracing::error!(
                    kind = ?alert.kind,
                    operation = %alert.operation,
                    value = alert.value,
                    "{}",
                    alert.message
                ),
                AlertSeverity::Warning => tracing::warn!(
                    kind = ?alert.kind,
                    operation = %alert.operation,
                    value = alert.value,
                    "{}",
                    alert.message
                ),
            }
        }

        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if subscribers.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { deliver(&subscribers, &alerts) });
            }
            Err(_) => deliver(&subscribers, &alerts),
        }
    }

    fn recommendations(&self, summary: &AnalyticsSummary, patterns: &[QueryPattern]) -> Vec<String> {
        let mut recommendations = Vec::new();
        if summary.count == 0 {
            return recommendations;
        }

        if summary.p95_ms > self.config.slow_threshold_ms {
            recommendations.push(format!(
                "p95 latency {:.1}ms is above the {:.1}ms slow threshold; review indexes on hot tables",
                summary.p95_ms, self.config.slow_threshold_ms
            ));
        }
        if summary.error_rate > self.config.error_rate_threshold {
            recommendations.push(format!(
                "error rate {:.1}% is above {:.1}%; check region health and store connectivity",
                summary.error_rate * 100.0,
                self.config.error_rate_threshold * 100.0
            ));
        }
        for pattern in patterns
            .iter()
            .filter(|p| p.avg_ms >= self.config.slow_threshold_ms)
        {
            recommendations.push(format!(
                "'{}' averages {:.1}ms over {} runs; consider caching its result",
                pattern.pattern, pattern.avg_ms, pattern.count
            ));
        }
        recommendations
    }
}

fn deliver(subscribers: &[AlertCallback], alerts: &[PerformanceAlert]) {
    for alert in alerts {
        for callback in subscribers {
            if catch_unwind(AssertUnwindSafe(|| callback(alert))).is_err() {
                tracing::warn!(operation = %alert.operation, "alert subscriber panicked");
            }
        }
    }
}

fn export(metrics: &QueryMetrics) {
    let operation = metrics.operation.clone();
    metrics::histogram!(DURATION_METRIC, "operation" => operation.clone())
        .record(metrics.duration_ms / 1000.0);
    if metrics.is_error() {
        metrics::counter!(ERROR_METRIC, "operation" => operation).increment(1);
    }
}

fn summarize(samples: &[QueryMetrics]) -> AnalyticsSummary {
    let durations: Vec<f64> = samples.iter().map(|m| m.duration_ms).collect();
    let latency = LatencySummary::from_samples(&durations);
    let error_count = samples.iter().filter(|m| m.is_error()).count();

    AnalyticsSummary {
        count: latency.count,
        error_count,
        error_rate: ratio(error_count, samples.len()),
        mean_ms: latency.mean_ms,
        median_ms: latency.median_ms,
        p95_ms: latency.p95_ms,
        p99_ms: latency.p99_ms,
        max_ms: latency.max_ms,
    }
}

fn per_operation(samples: &[QueryMetrics]) -> BTreeMap<String, OperationStats> {
    let mut grouped: HashMap<&str, Vec<&QueryMetrics>> = HashMap::new();
    for sample in samples {
        grouped.entry(sample.operation.as_str()).or_default().push(sample);
    }

    grouped
        .into_iter()
        .map(|(operation, group)| {
            let durations: Vec<f64> = group.iter().map(|m| m.duration_ms).collect();
            let latency = LatencySummary::from_samples(&durations);
            let error_count = group.iter().filter(|m| m.is_error()).count();
            let stats = OperationStats {
                count: group.len(),
                error_count,
                error_rate: ratio(error_count, group.len()),
                mean_ms: latency.mean_ms,
                p95_ms: latency.p95_ms,
                max_ms: latency.max_ms,
            };
            (operation.to_string(), stats)
        })
        .collect()
}

fn recurring_patterns(samples: &[QueryMetrics], limit: usize) -> Vec<QueryPattern> {
    let mut grouped: HashMap<String, QueryPattern> = HashMap::new();
    for sample in samples {
        let pattern = grouped
            .entry(normalize_operation(&sample.operation))
            .or_insert_with_key(|key| QueryPattern {
                pattern: key.clone(),
                count: 0,
                avg_ms: 0.0,
                max_ms: 0.0,
                error_count: 0,
            });
        pattern.avg_ms += sample.duration_ms;
        pattern.max_ms = pattern.max_ms.max(sample.duration_ms);
        pattern.count += 1;
        if sample.is_error() {
            pattern.error_count += 1;
        }
    }

    let mut patterns: Vec<QueryPattern> = grouped
        .into_values()
        .filter(|p| p.count >= 2)
        .map(|mut p| {
            p.avg_ms /= p.count as f64;
            p
        })
        .collect();
    patterns.sort_by(|a, b| {
        b.avg_ms
            .total_cmp(&a.avg_ms)
            .then_with(|| a.pattern.cmp(&b.pattern))
    });
    patterns.truncate(limit);
    patterns
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
