//! Threshold evaluation and reward code issuance.
//!
//! After a positive ledger mutation the engine works out how many codes the
//! balance pays for, bounded by the tenant's active-card cap, and mints them
//! one at a time. Each card is a single store transaction that re-validates
//! the balance and the cap, deducts the points, inserts the code and appends
//! the audit entry. The engine also holds a per-(customer, tenant) lock for
//! the whole evaluation, so two evaluations for the same pair never plan
//! against the same balance.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::code::CodeGenerator;
use super::settings::{RewardSettings, SettingsService};
use crate::config::DEFAULT_CODE_RETRY_LIMIT;
use crate::dispatch::{Notification, NotificationDispatcher};
use crate::error::{LoyaltyError, Result};
use crate::model::RewardCode;
use crate::storage::{bounded, IssueRequest, IssuedReward, StorageError, Stores};
use crate::utils::locks::KeyedLocks;

/// Why no code was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligibility {
    /// The balance does not cover one more code.
    InsufficientPoints { needed: i64 },
    /// The customer already holds the maximum number of active codes.
    CapReached { active: i64, cap: i64 },
}

/// Why one card in a batch was not issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardFailure {
    /// Every candidate code was already taken.
    CodeCollision { attempts: u32 },
    /// The balance no longer covered the card when it was deducted.
    InsufficientPoints,
    /// The cap was reached when the card was inserted.
    CapReached,
    /// Storage failed after earlier cards were issued; the rest of the batch
    /// was not attempted.
    Aborted(String),
}

/// Result for one card of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardOutcome {
    Issued(RewardCode),
    Failed(CardFailure),
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardEvaluation {
    NotEligible {
        reason: Ineligibility,
        total_points: i64,
    },
    /// At least one card was attempted. `total_points` is the balance after
    /// the last committed deduction.
    Attempted {
        outcomes: Vec<CardOutcome>,
        total_points: i64,
    },
}

impl RewardEvaluation {
    /// Codes minted by this evaluation, in issuance order.
    pub fn issued(&self) -> Vec<&RewardCode> {
        match self {
            RewardEvaluation::NotEligible { .. } => Vec::new(),
            RewardEvaluation::Attempted { outcomes, .. } => outcomes
                .iter()
                .filter_map(|outcome| match outcome {
                    CardOutcome::Issued(code) => Some(code),
                    CardOutcome::Failed(_) => None,
                })
                .collect(),
        }
    }

    pub fn total_points(&self) -> i64 {
        match self {
            RewardEvaluation::NotEligible { total_points, .. }
            | RewardEvaluation::Attempted { total_points, .. } => *total_points,
        }
    }
}

/// Number of codes a balance pays for, and why it is zero when it is.
fn plan(
    settings: &RewardSettings,
    total_points: i64,
    active: i64,
) -> std::result::Result<i64, Ineligibility> {
    let by_points = total_points.max(0) / settings.points_required;
    let by_cap = settings.max_active_cards - active;
    if by_points <= 0 {
        return Err(Ineligibility::InsufficientPoints {
            needed: settings.points_to_next(total_points),
        });
    }
    if by_cap <= 0 {
        return Err(Ineligibility::CapReached {
            active,
            cap: settings.max_active_cards,
        });
    }
    Ok(by_points.min(by_cap))
}

enum IssueFailure {
    Collision(u32),
    Storage(StorageError),
}

/// Mints reward codes when balances cross the tenant threshold.
pub struct RewardEngine {
    stores: Stores,
    settings: SettingsService,
    dispatcher: NotificationDispatcher,
    codes: CodeGenerator,
    code_retry_limit: u32,
    timeout: Duration,
    locks: KeyedLocks<(Uuid, Uuid)>,
}

impl RewardEngine {
    pub fn new(
        stores: Stores,
        settings: SettingsService,
        dispatcher: NotificationDispatcher,
        timeout: Duration,
    ) -> Self {
        Self {
            stores,
            settings,
            dispatcher,
            codes: CodeGenerator::default(),
            code_retry_limit: DEFAULT_CODE_RETRY_LIMIT,
            timeout,
            locks: KeyedLocks::new(),
        }
    }

    pub fn with_codes(mut self, codes: CodeGenerator) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_code_retry_limit(mut self, limit: u32) -> Self {
        self.code_retry_limit = limit.max(1);
        self
    }

    /// Issue every code the current balance qualifies for.
    ///
    /// A storage failure before any card commits is returned as an error; the
    /// caller may re-invoke safely. Once a card has committed, later failures
    /// are reported per card instead.
    pub async fn evaluate(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<RewardEvaluation> {
        let guard = self.locks.lock((customer_id, tenant_id)).await;

        let settings = self.settings.get(tenant_id).await?;
        let entry = bounded(
            self.timeout,
            "ledger.get",
            self.stores.ledger.get(customer_id, tenant_id),
        )
        .await?
        .ok_or_else(|| {
            LoyaltyError::not_found("ledger entry", format!("{customer_id}/{tenant_id}"))
        })?;
        let active = bounded(
            self.timeout,
            "rewards.count_active",
            self.stores
                .rewards
                .count_active(customer_id, tenant_id, Utc::now()),
        )
        .await?;

        let issuable = match plan(&settings, entry.total_points, active) {
            Ok(issuable) => issuable,
            Err(reason) => {
                debug!(
                    customer_id = %customer_id,
                    tenant_id = %tenant_id,
                    total_points = entry.total_points,
                    active,
                    ?reason,
                    "Not eligible for a reward"
                );
                return Ok(RewardEvaluation::NotEligible {
                    reason,
                    total_points: entry.total_points,
                });
            }
        };

        let mut outcomes = Vec::with_capacity(issuable as usize);
        let mut total_points = entry.total_points;

        for _ in 0..issuable {
            match self.issue_one(customer_id, tenant_id, &settings).await {
                Ok(issued) => {
                    info!(
                        customer_id = %customer_id,
                        tenant_id = %tenant_id,
                        code = %issued.reward.code,
                        total_points = issued.entry.total_points,
                        "Reward code issued"
                    );
                    total_points = issued.entry.total_points;
                    outcomes.push(CardOutcome::Issued(issued.reward));
                }
                Err(IssueFailure::Collision(attempts)) => {
                    warn!(
                        customer_id = %customer_id,
                        tenant_id = %tenant_id,
                        attempts,
                        "No free reward code found, skipping card"
                    );
                    outcomes.push(CardOutcome::Failed(CardFailure::CodeCollision { attempts }));
                }
                Err(IssueFailure::Storage(StorageError::InsufficientPoints { .. })) => {
                    outcomes.push(CardOutcome::Failed(CardFailure::InsufficientPoints));
                    break;
                }
                Err(IssueFailure::Storage(StorageError::ActiveCardCap { .. })) => {
                    outcomes.push(CardOutcome::Failed(CardFailure::CapReached));
                    break;
                }
                Err(IssueFailure::Storage(e)) => {
                    if outcomes.is_empty() {
                        warn!(
                            customer_id = %customer_id,
                            tenant_id = %tenant_id,
                            error = %e,
                            "Reward issuance failed"
                        );
                        return Err(e.into());
                    }
                    warn!(
                        customer_id = %customer_id,
                        tenant_id = %tenant_id,
                        error = %e,
                        "Reward issuance aborted after partial batch"
                    );
                    outcomes.push(CardOutcome::Failed(CardFailure::Aborted(e.to_string())));
                    break;
                }
            }
        }

        drop(guard);

        let evaluation = RewardEvaluation::Attempted {
            outcomes,
            total_points,
        };
        self.announce(customer_id, tenant_id, &evaluation).await;
        Ok(evaluation)
    }

    /// Mint one card, retrying only on code collisions.
    async fn issue_one(
        &self,
        customer_id: Uuid,
        tenant_id: Uuid,
        settings: &RewardSettings,
    ) -> std::result::Result<IssuedReward, IssueFailure> {
        for attempt in 1..=self.code_retry_limit {
            let code = self.codes.next_code();

            let taken = bounded(
                self.timeout,
                "rewards.code_exists",
                self.stores.rewards.code_exists(&code),
            )
            .await
            .map_err(IssueFailure::Storage)?;
            if taken {
                debug!(attempt, code = %code, "Reward code already taken");
                continue;
            }

            let now = Utc::now();
            let request = IssueRequest {
                code_id: Uuid::new_v4(),
                code,
                customer_id,
                tenant_id,
                value: settings.card_value,
                points_required: settings.points_required,
                max_active_cards: settings.max_active_cards,
                expires_at: now + chrono::Duration::days(settings.expiration_days),
                now,
            };

            match bounded(self.timeout, "rewards.issue", self.stores.rewards.issue(request)).await {
                Ok(issued) => return Ok(issued),
                // Lost a race with another issuer for the same code.
                Err(StorageError::CodeCollision(code)) => {
                    debug!(attempt, code = %code, "Reward code collided on insert");
                }
                Err(e) => return Err(IssueFailure::Storage(e)),
            }
        }
        Err(IssueFailure::Collision(self.code_retry_limit))
    }

    /// Queue a notification per issued code. Never fails.
    async fn announce(&self, customer_id: Uuid, tenant_id: Uuid, evaluation: &RewardEvaluation) {
        let issued = evaluation.issued();
        if issued.is_empty() {
            return;
        }

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

        let (customer, tenant) = match (customer, tenant) {
            (Ok(Some(customer)), Ok(Some(tenant))) => (customer, tenant),
            (Err(e), _) | (_, Err(e)) => {
                warn!(customer_id = %customer_id, error = %e, "Cannot announce rewards");
                return;
            }
            _ => {
                debug!(customer_id = %customer_id, "Reward recipient unknown, not announcing");
                return;
            }
        };
        if customer.opted_out {
            debug!(customer_id = %customer_id, "Customer opted out, not announcing rewards");
            return;
        }

        for reward in issued {
            self.dispatcher.notify(Notification::RewardIssued {
                recipient: customer.identity.clone(),
                tenant_name: tenant.name.clone(),
                code: reward.code.clone(),
                value: reward.value,
                expires_at: reward.expires_at,
            });
        }
    }
}
