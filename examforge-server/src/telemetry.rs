use anyhow::Result;
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const OPERATION_DURATION: &str = "examforge_operation_duration_seconds";

/// Installs the Prometheus recorder and returns the handle `/metrics` renders.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(OPERATION_DURATION.to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.2, 0.5, 1.0, 2.5, 5.0],
        )?
        .install_recorder()?;

    describe_histogram!(
        OPERATION_DURATION,
        Unit::Seconds,
        "Duration of data layer operations"
    );
    describe_counter!(
        "examforge_operation_errors_total",
        "Data layer operations that returned an error"
    );
    describe_counter!(
        "examforge_cache_lookups_total",
        "Cache lookups by result"
    );

    Ok(handle)
}
