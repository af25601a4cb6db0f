//! Reward code lifecycle: redemption, cancellation and expiry.
//!
//! ```text
//! active ──redeem──▶ redeemed
//!   │ ───cancel──▶ cancelled
//!   └────expire──▶ expired
//! ```
//!
//! Every state other than `active` is terminal. Each transition is one store
//! call that flips the status and writes its audit record together, so a
//! failed precondition leaves nothing behind.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::approver::ApproverValidator;
use crate::error::{LoyaltyError, Result};
use crate::model::{Attribution, RewardCode, RewardStatus};
use crate::storage::{bounded, Redemption, Stores};

pub struct RedemptionService {
    stores: Stores,
    approvers: Arc<dyn ApproverValidator>,
    timeout: Duration,
}

impl RedemptionService {
    pub fn new(stores: Stores, approvers: Arc<dyn ApproverValidator>, timeout: Duration) -> Self {
        Self {
            stores,
            approvers,
            timeout,
        }
    }

    async fn load(&self, code_id: Uuid) -> Result<RewardCode> {
        bounded(self.timeout, "rewards.get", self.stores.rewards.get(code_id))
            .await?
            .ok_or_else(|| LoyaltyError::not_found("reward code", code_id))
    }

    /// Redeem an active, unexpired code on behalf of `operator_id`.
    ///
    /// The approver PIN is checked against the code's tenant before anything
    /// is written.
    pub async fn redeem(
        &self,
        code_id: Uuid,
        operator_id: Uuid,
        approver_pin: &str,
    ) -> Result<Redemption> {
        self.redeem_at(code_id, operator_id, approver_pin, Utc::now())
            .await
    }

    /// [`redeem`](Self::redeem) with an explicit clock.
    pub async fn redeem_at(
        &self,
        code_id: Uuid,
        operator_id: Uuid,
        approver_pin: &str,
        now: DateTime<Utc>,
    ) -> Result<Redemption> {
        let reward = self.load(code_id).await?;
        check_redeemable(&reward, now)?;

        let approver_id = self.approvers.validate(reward.tenant_id, approver_pin).await?;

        let attribution = Attribution::staff(
            operator_id,
            Some(approver_id),
            format!("Redeemed reward code {} (value {})", reward.code, reward.value),
        );
        let redemption = bounded(
            self.timeout,
            "rewards.redeem",
            self.stores.rewards.redeem(code_id, now, attribution),
        )
        .await?;

        info!(
            code = %redemption.reward.code,
            customer_id = %redemption.reward.customer_id,
            tenant_id = %redemption.reward.tenant_id,
            operator_id = %operator_id,
            approver_id = %approver_id,
            "Reward code redeemed"
        );
        Ok(redemption)
    }

    /// Redeem by the printed code instead of its id.
    pub async fn redeem_code(
        &self,
        code: &str,
        operator_id: Uuid,
        approver_pin: &str,
    ) -> Result<Redemption> {
        let normalized = code.trim().to_uppercase();
        let reward = bounded(
            self.timeout,
            "rewards.find_by_code",
            self.stores.rewards.find_by_code(&normalized),
        )
        .await?
        .ok_or_else(|| LoyaltyError::not_found("reward code", &normalized))?;
        self.redeem(reward.id, operator_id, approver_pin).await
    }

    /// Withdraw an active code. Points are not refunded.
    pub async fn cancel(
        &self,
        code_id: Uuid,
        operator_id: Uuid,
        reason: &str,
    ) -> Result<RewardCode> {
        let reward = self.load(code_id).await?;
        if reward.status != RewardStatus::Active {
            return Err(LoyaltyError::State(format!(
                "reward code {} is {}",
                reward.code, reward.status
            )));
        }

        let attribution = Attribution::staff(
            operator_id,
            None,
            format!("Cancelled reward code {}: {}", reward.code, reason),
        );
        let cancelled = bounded(
            self.timeout,
            "rewards.cancel",
            self.stores.rewards.cancel(code_id, Utc::now(), attribution),
        )
        .await?;

        info!(code = %cancelled.code, operator_id = %operator_id, "Reward code cancelled");
        Ok(cancelled)
    }

    /// Move every active code past its expiry to `expired`.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<RewardCode>> {
        let expired = bounded(
            self.timeout,
            "rewards.expire_due",
            self.stores.rewards.expire_due(now),
        )
        .await
        .inspect_err(|e| warn!(error = %e, "Expiry sweep failed"))?;

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired reward codes");
        }
        Ok(expired)
    }

    /// Codes held by a customer at a tenant, oldest first.
    pub async fn list_for(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<Vec<RewardCode>> {
        Ok(bounded(
            self.timeout,
            "rewards.list_for",
            self.stores.rewards.list_for(customer_id, tenant_id),
        )
        .await?)
    }
}

fn check_redeemable(reward: &RewardCode, now: DateTime<Utc>) -> Result<()> {
    if reward.status != RewardStatus::Active {
        return Err(LoyaltyError::State(format!(
            "reward code {} is {}",
            reward.code, reward.status
        )));
    }
    if now >= reward.expires_at {
        return Err(LoyaltyError::State(format!(
            "reward code {} expired at {}",
            reward.code, reward.expires_at
        )));
    }
    Ok(())
}
