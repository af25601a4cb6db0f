//! Per-tenant reward configuration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{LoyaltyError, Result};
use crate::storage::{bounded, SettingsStore};

/// Reward rules for one tenant.
///
/// Tenants without stored settings get [`RewardSettings::default`], or the
/// process-wide defaults from configuration when those are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardSettings {
    /// Points consumed per reward code.
    pub points_required: i64,
    /// Redeemable value of each code.
    pub card_value: i64,
    /// Days from issuance until a code expires.
    pub expiration_days: i64,
    /// Upper bound on simultaneously active codes per customer.
    pub max_active_cards: i64,
    /// Per-check-in award for this tenant. Falls back to the global value.
    pub checkin_points: Option<i64>,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            points_required: 100,
            card_value: 5,
            expiration_days: 30,
            max_active_cards: 5,
            checkin_points: None,
        }
    }
}

impl RewardSettings {
    pub fn validate(&self) -> Result<()> {
        if self.points_required <= 0 {
            return Err(LoyaltyError::Validation(
                "points_required must be positive".to_string(),
            ));
        }
        if self.card_value <= 0 {
            return Err(LoyaltyError::Validation(
                "card_value must be positive".to_string(),
            ));
        }
        if self.expiration_days <= 0 {
            return Err(LoyaltyError::Validation(
                "expiration_days must be positive".to_string(),
            ));
        }
        if self.max_active_cards <= 0 {
            return Err(LoyaltyError::Validation(
                "max_active_cards must be positive".to_string(),
            ));
        }
        if matches!(self.checkin_points, Some(p) if p < 0) {
            return Err(LoyaltyError::Validation(
                "checkin_points cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Points still missing before the next code can be issued.
    pub fn points_to_next(&self, total_points: i64) -> i64 {
        if total_points < 0 {
            return self.points_required - total_points;
        }
        let remainder = total_points % self.points_required;
        self.points_required - remainder
    }
}

/// Read-mostly access to tenant settings with fallback to defaults.
#[derive(Clone)]
pub struct SettingsService {
    store: Arc<dyn SettingsStore>,
    defaults: RewardSettings,
    timeout: Duration,
}

impl SettingsService {
    pub fn new(store: Arc<dyn SettingsStore>, defaults: RewardSettings, timeout: Duration) -> Self {
        Self {
            store,
            defaults,
            timeout,
        }
    }

    /// Tenant settings, or the configured defaults when none are stored.
    pub async fn get(&self, tenant_id: Uuid) -> Result<RewardSettings> {
        let stored = bounded(self.timeout, "settings.get", self.store.get(tenant_id)).await?;
        Ok(stored.unwrap_or_else(|| self.defaults.clone()))
    }

    /// Replace a tenant's settings after validating them.
    pub async fn put(&self, tenant_id: Uuid, settings: RewardSettings) -> Result<()> {
        settings.validate()?;
        bounded(
            self.timeout,
            "settings.put",
            self.store.put(tenant_id, &settings),
        )
        .await?;
        info!(
            tenant_id = %tenant_id,
            points_required = settings.points_required,
            "Reward settings updated"
        );
        Ok(())
    }

    pub fn defaults(&self) -> &RewardSettings {
        &self.defaults
    }
}
