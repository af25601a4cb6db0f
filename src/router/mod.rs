//! Inbound event routing.
//!
//! Each inbound message is filtered (only direct, customer-sent text
//! messages count), deduplicated by its provider message id, classified and
//! handed to the service that owns the resulting mutation. The reply is
//! queued for delivery and also returned to the caller.

pub mod classify;
pub mod replies;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dispatch::{Notification, NotificationDispatcher};
use crate::error::{LoyaltyError, Result};
use crate::ledger::LedgerService;
use crate::model::Customer;
use crate::rewards::SettingsService;
use crate::storage::{bounded, Stores};

pub use classify::{classify, is_group_sender, validate_profile, Command};
pub use replies::TenantBalance;

/// The only event type that is processed.
pub const MESSAGE_EVENT: &str = "message";

/// A provider-delivered event, already lifted out of the webhook payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Provider message id, used as the dedup key.
    pub message_id: String,
    pub event_type: String,
    pub sender: String,
    pub from_self: bool,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// What happened to one inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    Processed { command: &'static str, reply: String },
    Ignored { reason: &'static str },
    Duplicate,
}

pub struct EventRouter {
    stores: Stores,
    ledger: Arc<LedgerService>,
    settings: SettingsService,
    dispatcher: NotificationDispatcher,
    timeout: Duration,
}

impl EventRouter {
    pub fn new(
        stores: Stores,
        ledger: Arc<LedgerService>,
        settings: SettingsService,
        dispatcher: NotificationDispatcher,
        timeout: Duration,
    ) -> Self {
        Self {
            stores,
            ledger,
            settings,
            dispatcher,
            timeout,
        }
    }

    /// Route one event.
    ///
    /// The message id is claimed before processing so concurrent deliveries
    /// of the same id run once. If processing fails, the claim is released
    /// and a redelivery is handled as new. Every failure path leaves the
    /// ledger untouched, so the redelivery awards at most once.
    pub async fn handle(&self, event: InboundEvent) -> Result<RouteOutcome> {
        if event.event_type != MESSAGE_EVENT {
            return Ok(RouteOutcome::Ignored { reason: "not_a_message" });
        }
        if event.from_self {
            return Ok(RouteOutcome::Ignored { reason: "from_self" });
        }
        if is_group_sender(&event.sender) {
            return Ok(RouteOutcome::Ignored { reason: "group_sender" });
        }
        if event.message_id.trim().is_empty() {
            return Err(LoyaltyError::Validation("message id is required".to_string()));
        }
        if event.sender.trim().is_empty() {
            return Err(LoyaltyError::Validation("sender is required".to_string()));
        }

        let fresh = bounded(
            self.timeout,
            "directory.record_inbound_event",
            self.stores
                .directory
                .record_inbound_event(&event.message_id, event.received_at),
        )
        .await?;
        if !fresh {
            info!(message_id = %event.message_id, "Duplicate inbound event");
            return Ok(RouteOutcome::Duplicate);
        }

        let command = classify(&event.text);
        let kind = command.kind();
        debug!(message_id = %event.message_id, command = kind, "Classified inbound message");

        let reply = match self.respond(&event.sender, command).await {
            Ok(reply) => reply,
            Err(LoyaltyError::Validation(reason)) => replies::invalid(&reason),
            Err(e) => {
                self.release(&event.message_id).await;
                return Err(e);
            }
        };

        self.dispatcher.notify(Notification::Reply {
            recipient: event.sender.clone(),
            text: reply.clone(),
        });
        Ok(RouteOutcome::Processed {
            command: kind,
            reply,
        })
    }

    /// Forget processed message ids received before `before`.
    pub async fn prune_processed(&self, before: DateTime<Utc>) -> Result<u64> {
        let pruned = bounded(
            self.timeout,
            "directory.prune_inbound_events",
            self.stores.directory.prune_inbound_events(before),
        )
        .await?;
        if pruned > 0 {
            info!(pruned, "Pruned processed message ids");
        }
        Ok(pruned)
    }

    async fn release(&self, message_id: &str) {
        let released = bounded(
            self.timeout,
            "directory.forget_inbound_event",
            self.stores.directory.forget_inbound_event(message_id),
        )
        .await;
        if let Err(e) = released {
            warn!(
                message_id,
                error = %e,
                "Failed to release message id, redelivery will be ignored"
            );
        }
    }

    async fn respond(&self, sender: &str, command: Command) -> Result<String> {
        match command {
            Command::CheckIn {
                tenant_name,
                branch_name,
            } => self.check_in(sender, &tenant_name, &branch_name).await,
            Command::BalanceQuery => {
                let balances = self.balances(sender).await?;
                Ok(replies::balance(&balances))
            }
            Command::ChallengeQuery => {
                let balances = self.balances(sender).await?;
                Ok(replies::challenge(&balances))
            }
            Command::OptOut => {
                let customer = self.ensure_customer(sender).await?;
                bounded(
                    self.timeout,
                    "directory.set_opted_out",
                    self.stores.directory.set_opted_out(customer.id, true),
                )
                .await?;
                info!(customer_id = %customer.id, "Customer opted out");
                Ok(replies::OPTED_OUT.to_string())
            }
            Command::StructuredInfo(profile) => {
                validate_profile(&profile)?;
                let customer = self.ensure_customer(sender).await?;
                bounded(
                    self.timeout,
                    "directory.update_profile",
                    self.stores.directory.update_profile(customer.id, &profile),
                )
                .await?;
                info!(customer_id = %customer.id, "Customer profile updated");
                Ok(replies::PROFILE_UPDATED.to_string())
            }
            Command::Help | Command::Unrecognized => Ok(replies::HELP.to_string()),
        }
    }

    async fn check_in(
        &self,
        sender: &str,
        tenant_name: &str,
        branch_name: &str,
    ) -> Result<String> {
        let tenant = bounded(
            self.timeout,
            "directory.tenant_by_name",
            self.stores.directory.tenant_by_name(tenant_name),
        )
        .await?;
        let Some(tenant) = tenant else {
            info!(tenant_name, "Check-in for unknown tenant");
            return Ok(replies::tenant_not_found(tenant_name));
        };

        let branch = bounded(
            self.timeout,
            "directory.branch_by_name",
            self.stores.directory.branch_by_name(tenant.id, branch_name),
        )
        .await?;
        if branch.is_none() {
            debug!(
                tenant_id = %tenant.id,
                branch_name,
                "Unknown branch, checking in at tenant level"
            );
        }

        let customer = self.ensure_customer(sender).await?;
        let award = self
            .ledger
            .check_in(customer.id, tenant.id, branch.as_ref())
            .await?;
        Ok(replies::check_in(
            &tenant.name,
            branch.as_ref().map(|b| b.name.as_str()),
            &award,
        ))
    }

    /// Balances for a sender, by tenant name. Unknown senders have none.
    async fn balances(&self, sender: &str) -> Result<Vec<TenantBalance>> {
        let customer = bounded(
            self.timeout,
            "directory.customer_by_identity",
            self.stores.directory.customer_by_identity(sender),
        )
        .await?;
        let Some(customer) = customer else {
            return Ok(Vec::new());
        };

        let mut balances = Vec::new();
        for entry in self.ledger.balances(customer.id).await? {
            let tenant = bounded(
                self.timeout,
                "directory.tenant",
                self.stores.directory.tenant(entry.tenant_id),
            )
            .await?;
            let Some(tenant) = tenant else {
                continue;
            };
            let settings = self.settings.get(tenant.id).await?;
            balances.push(TenantBalance {
                tenant_name: tenant.name,
                total_points: entry.total_points,
                points_required: settings.points_required,
                points_to_next: settings.points_to_next(entry.total_points),
            });
        }
        balances.sort_by(|a, b| a.tenant_name.cmp(&b.tenant_name));
        Ok(balances)
    }

    async fn ensure_customer(&self, sender: &str) -> Result<Customer> {
        Ok(bounded(
            self.timeout,
            "directory.ensure_customer",
            self.stores.directory.ensure_customer(sender),
        )
        .await?)
    }
}

#[cfg(test)]
mod tests;
