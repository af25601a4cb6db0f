//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::config::DispatchConfig;
use crate::dispatch::DispatchError;

/// Backoff for outbound notification delivery, from configuration.
pub fn dispatch_backoff(config: &DispatchConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(config.min_delay())
        .with_max_delay(config.max_delay())
        .with_max_times(config.max_retries)
        .with_jitter()
}

/// Backoff for opening the database at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 10
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(10)
        .with_jitter()
}

/// Determines if a delivery failure is worth retrying.
///
/// Rejected messages (bad recipient, opted out at the provider) never
/// succeed on retry.
pub fn is_retryable_dispatch(error: &DispatchError) -> bool {
    matches!(error, DispatchError::Unavailable(_) | DispatchError::Timeout)
}
