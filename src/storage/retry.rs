//! Retry policy for transient backend failures.
//!
//! Serialization failures and deadlocks clear on retry; logical failures
//! (validation, condition checks) never do and surface immediately.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff for retrying a whole write transaction.
///
/// - Min delay: 10ms
/// - Max delay: 1s
/// - Max attempts: 5
/// - Jitter enabled
pub fn write_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_secs(1))
        .with_max_times(5)
        .with_jitter()
}
