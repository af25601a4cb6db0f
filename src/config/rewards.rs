//! Reward and check-in configuration types.

use serde::Deserialize;

use crate::rewards::RewardSettings;

/// Default prefix for generated reward codes.
pub const DEFAULT_CODE_PREFIX: &str = "GC";

/// Default number of attempts to find an unused code for one card.
pub const DEFAULT_CODE_RETRY_LIMIT: u32 = 5;

/// Default points awarded per check-in.
pub const DEFAULT_CHECKIN_POINTS: i64 = 10;

/// Global reward configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    /// Settings for tenants that have none stored.
    pub defaults: RewardSettings,
    /// Prefix for generated codes, e.g. `GC-XXXX-XXXX-XXXX`.
    pub code_prefix: String,
    /// Attempts per card before giving up on a colliding code.
    pub code_retry_limit: u32,
    /// Interval of the expiry sweep, in seconds. Zero disables it.
    pub expiry_sweep_secs: u64,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            defaults: RewardSettings::default(),
            code_prefix: DEFAULT_CODE_PREFIX.to_string(),
            code_retry_limit: DEFAULT_CODE_RETRY_LIMIT,
            expiry_sweep_secs: 300,
        }
    }
}

/// Check-in award configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckinConfig {
    /// Points per check-in, unless the tenant overrides it.
    pub points_per_checkin: i64,
}

impl Default for CheckinConfig {
    fn default() -> Self {
        Self {
            points_per_checkin: DEFAULT_CHECKIN_POINTS,
        }
    }
}
