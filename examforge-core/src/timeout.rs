//! Uniform deadline for store and edge-cache I/O.
//!
//! Every store statement, probe and edge KV call goes through
//! [`with_timeout`] with the single configured connection timeout.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} timed out after {elapsed:?}")]
pub struct TimeoutError {
    pub operation: String,
    pub elapsed: Duration,
}

/// Runs `future` with a deadline, converting expiry into the caller's error type.
pub async fn with_timeout<F, T, E>(operation: &str, duration: Duration, future: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<TimeoutError>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(E::from(TimeoutError {
            operation: operation.to_string(),
            elapsed: duration,
        })),
    }
}
