//! Notification dispatch configuration.

use std::time::Duration;

use serde::Deserialize;

/// Default notification queue capacity.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 1024;

/// Outbound notification queue and retry policy.
///
/// Notifications beyond `capacity` are dropped, never awaited.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub capacity: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_DISPATCH_CAPACITY,
            min_delay_ms: 100,
            max_delay_ms: 5_000,
            max_retries: 5,
        }
    }
}

impl DispatchConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}
