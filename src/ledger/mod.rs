//! Point awards and adjustments.
//!
//! Every mutation here is one `apply_delta` call, which commits the balance
//! change and its audit entry together. Reward evaluation and notifications
//! run afterwards; their failures are logged and never undo the award.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::{Notification, NotificationDispatcher};
use crate::error::{LoyaltyError, Result};
use crate::model::{Attribution, Branch, LedgerEntry};
use crate::rewards::{ApproverValidator, RewardEngine, RewardEvaluation, SettingsService};
use crate::storage::{bounded, LedgerMutation, OverdraftPolicy, Stores};

/// A staff-initiated award at the point of sale.
#[derive(Debug, Clone)]
pub struct PosAward {
    pub customer_id: Uuid,
    pub tenant_id: Uuid,
    pub points: i64,
    pub operator_id: Uuid,
    pub approver_pin: String,
    pub note: Option<String>,
}

/// A signed correction to a balance.
#[derive(Debug, Clone)]
pub struct Adjustment {
    pub customer_id: Uuid,
    pub tenant_id: Uuid,
    pub delta: i64,
    pub operator_id: Uuid,
    pub approver_pin: String,
    pub note: String,
    pub overdraft: OverdraftPolicy,
}

/// A committed award and whatever the reward engine made of it.
#[derive(Debug, Clone)]
pub struct PointsAward {
    /// Ledger state right after the award, before any reward deduction.
    pub entry: LedgerEntry,
    /// The ledger entry was created by this award.
    pub created: bool,
    pub points: i64,
    /// `None` when evaluation was skipped or failed. The award stands either way.
    pub rewards: Option<RewardEvaluation>,
}

impl PointsAward {
    /// Balance after the award and any codes it paid for.
    pub fn total_points(&self) -> i64 {
        self.rewards
            .as_ref()
            .map(RewardEvaluation::total_points)
            .unwrap_or(self.entry.total_points)
    }
}

pub struct LedgerService {
    stores: Stores,
    settings: SettingsService,
    engine: Arc<RewardEngine>,
    approvers: Arc<dyn ApproverValidator>,
    dispatcher: NotificationDispatcher,
    checkin_points: i64,
    timeout: Duration,
}

impl LedgerService {
    pub fn new(
        stores: Stores,
        settings: SettingsService,
        engine: Arc<RewardEngine>,
        approvers: Arc<dyn ApproverValidator>,
        dispatcher: NotificationDispatcher,
        checkin_points: i64,
        timeout: Duration,
    ) -> Self {
        Self {
            stores,
            settings,
            engine,
            approvers,
            dispatcher,
            checkin_points,
            timeout,
        }
    }

    /// Points a check-in at this tenant is worth.
    pub async fn checkin_points_for(&self, tenant_id: Uuid) -> Result<i64> {
        let settings = self.settings.get(tenant_id).await?;
        Ok(settings.checkin_points.unwrap_or(self.checkin_points))
    }

    /// Record a visit and award the check-in points.
    ///
    /// The caller replies to the customer; no notification is queued here.
    pub async fn check_in(
        &self,
        customer_id: Uuid,
        tenant_id: Uuid,
        branch: Option<&Branch>,
    ) -> Result<PointsAward> {
        let points = self.checkin_points_for(tenant_id).await?;
        let note = match branch {
            Some(branch) => format!("Check-in at {}", branch.name),
            None => "Check-in".to_string(),
        };

        let (entry, created) = self
            .mutate(
                customer_id,
                tenant_id,
                points,
                true,
                OverdraftPolicy::Reject,
                Attribution::system(note),
            )
            .await?;
        info!(
            customer_id = %customer_id,
            tenant_id = %tenant_id,
            branch = branch.map(|b| b.name.as_str()),
            points,
            total_points = entry.total_points,
            "Check-in recorded"
        );

        let rewards = self.evaluate(customer_id, tenant_id, points).await;
        Ok(PointsAward {
            entry,
            created,
            points,
            rewards,
        })
    }

    /// Award points at the point of sale. Requires a valid approver PIN.
    pub async fn award_points(&self, award: PosAward) -> Result<PointsAward> {
        if award.points <= 0 {
            return Err(LoyaltyError::Validation(format!(
                "award must be positive, got {}",
                award.points
            )));
        }
        let approver_id = self
            .approvers
            .validate(award.tenant_id, &award.approver_pin)
            .await?;

        let note = award
            .note
            .clone()
            .unwrap_or_else(|| format!("Awarded {} points", award.points));
        let attribution = Attribution::staff(award.operator_id, Some(approver_id), note);
        let (entry, created) = self
            .mutate(
                award.customer_id,
                award.tenant_id,
                award.points,
                true,
                OverdraftPolicy::Reject,
                attribution,
            )
            .await?;
        info!(
            customer_id = %award.customer_id,
            tenant_id = %award.tenant_id,
            operator_id = %award.operator_id,
            points = award.points,
            total_points = entry.total_points,
            "Points awarded"
        );

        self.announce_points(award.customer_id, award.tenant_id, award.points, entry.total_points)
            .await;
        let rewards = self
            .evaluate(award.customer_id, award.tenant_id, award.points)
            .await;
        Ok(PointsAward {
            entry,
            created,
            points: award.points,
            rewards,
        })
    }

    /// Apply a signed correction to an existing balance.
    pub async fn adjust_points(&self, adjustment: Adjustment) -> Result<PointsAward> {
        if adjustment.delta == 0 {
            return Err(LoyaltyError::Validation(
                "adjustment delta cannot be zero".to_string(),
            ));
        }
        if adjustment.note.trim().is_empty() {
            return Err(LoyaltyError::Validation(
                "adjustment needs a note".to_string(),
            ));
        }
        let approver_id = self
            .approvers
            .validate(adjustment.tenant_id, &adjustment.approver_pin)
            .await?;

        let mutation = LedgerMutation {
            customer_id: adjustment.customer_id,
            tenant_id: adjustment.tenant_id,
            delta: adjustment.delta,
            visit: false,
            overdraft: adjustment.overdraft,
            attribution: Attribution::staff(
                adjustment.operator_id,
                Some(approver_id),
                adjustment.note.clone(),
            ),
        };
        let applied = bounded(
            self.timeout,
            "ledger.apply_delta",
            self.stores.ledger.apply_delta(mutation),
        )
        .await?;
        info!(
            customer_id = %adjustment.customer_id,
            tenant_id = %adjustment.tenant_id,
            delta = adjustment.delta,
            total_points = applied.entry.total_points,
            "Balance adjusted"
        );

        let rewards = self
            .evaluate(adjustment.customer_id, adjustment.tenant_id, adjustment.delta)
            .await;
        Ok(PointsAward {
            entry: applied.entry,
            created: false,
            points: adjustment.delta,
            rewards,
        })
    }

    /// Active ledger entries for a customer across tenants.
    pub async fn balances(&self, customer_id: Uuid) -> Result<Vec<LedgerEntry>> {
        Ok(bounded(
            self.timeout,
            "ledger.list_for_customer",
            self.stores.ledger.list_for_customer(customer_id),
        )
        .await?)
    }

    /// Hide an entry from balance replies. A later check-in reactivates it.
    pub async fn deactivate(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<()> {
        bounded(
            self.timeout,
            "ledger.deactivate",
            self.stores.ledger.deactivate(customer_id, tenant_id),
        )
        .await?;
        info!(customer_id = %customer_id, tenant_id = %tenant_id, "Ledger entry deactivated");
        Ok(())
    }

    async fn mutate(
        &self,
        customer_id: Uuid,
        tenant_id: Uuid,
        delta: i64,
        visit: bool,
        overdraft: OverdraftPolicy,
        attribution: Attribution,
    ) -> Result<(LedgerEntry, bool)> {
        let (_, created) = bounded(
            self.timeout,
            "ledger.get_or_create",
            self.stores.ledger.get_or_create(customer_id, tenant_id),
        )
        .await?;
        let applied = bounded(
            self.timeout,
            "ledger.apply_delta",
            self.stores.ledger.apply_delta(LedgerMutation {
                customer_id,
                tenant_id,
                delta,
                visit,
                overdraft,
                attribution,
            }),
        )
        .await?;
        Ok((applied.entry, created))
    }

    async fn evaluate(
        &self,
        customer_id: Uuid,
        tenant_id: Uuid,
        delta: i64,
    ) -> Option<RewardEvaluation> {
        if delta <= 0 {
            return None;
        }
        match self.engine.evaluate(customer_id, tenant_id).await {
            Ok(evaluation) => Some(evaluation),
            Err(e) => {
                warn!(
                    customer_id = %customer_id,
                    tenant_id = %tenant_id,
                    error = %e,
                    "Reward evaluation failed, award kept"
                );
                None
            }
        }
    }

    async fn announce_points(
        &self,
        customer_id: Uuid,
        tenant_id: Uuid,
        points: i64,
        total_points: i64,
    ) {
        let customer = bounded(
            self.timeout,
            "directory.customer",
            self.stores.directory.customer(customer_id),
        )
        .await;
        let tenant = bounded(
            self.timeout,
            "directory.tenant",
            self.stores.directory.tenant(tenant_id),
        )
        .await;
        match (customer, tenant) {
            (Ok(Some(customer)), Ok(Some(tenant))) => {
                if customer.opted_out {
                    debug!(
                        customer_id = %customer_id,
                        "Customer opted out, not announcing points"
                    );
                    return;
                }
                self.dispatcher.notify(Notification::PointsAssigned {
                    recipient: customer.identity,
                    tenant_name: tenant.name,
                    points,
                    total_points,
                });
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(customer_id = %customer_id, error = %e, "Cannot announce points");
            }
            _ => debug!(customer_id = %customer_id, "Points recipient unknown, not announcing"),
        }
    }
}
