//! Mock storage implementation for testing.
//!
//! All state sits behind one async mutex, so every trait method is atomic.
//! Failure and latency injection let tests drive the error paths of the
//! services above.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::helpers::name_key;
use super::{
    AppliedDelta, AuditLog, Directory, IssueRequest, IssuedReward, LedgerMutation, LedgerStore,
    OverdraftPolicy, ProfileUpdate, Redemption, Result, RewardStore, SettingsStore, StorageError,
};
use crate::model::{
    Attribution, AuditEntry, Branch, Customer, LedgerEntry, NewAuditEntry, RewardCode,
    RewardStatus, Tenant,
};
use crate::rewards::RewardSettings;

#[derive(Default)]
struct State {
    tenants: HashMap<Uuid, Tenant>,
    branches: HashMap<Uuid, Branch>,
    customers: HashMap<Uuid, Customer>,
    ledger: HashMap<(Uuid, Uuid), LedgerEntry>,
    audit: Vec<AuditEntry>,
    rewards: HashMap<Uuid, RewardCode>,
    codes: HashSet<String>,
    settings: HashMap<Uuid, RewardSettings>,
    processed_events: HashMap<String, DateTime<Utc>>,
}

impl State {
    fn push_audit(&mut self, entry: NewAuditEntry, now: DateTime<Utc>) -> AuditEntry {
        let audit = AuditEntry::from_new(Uuid::new_v4(), entry, now);
        self.audit.push(audit.clone());
        audit
    }

    fn active_count(&self, customer_id: Uuid, tenant_id: Uuid, now: DateTime<Utc>) -> i64 {
        self.rewards
            .values()
            .filter(|r| r.customer_id == customer_id && r.tenant_id == tenant_id && r.is_live(now))
            .count() as i64
    }
}

/// In-memory store implementing every storage trait.
#[derive(Default)]
pub struct MockStore {
    state: Mutex<State>,
    fail_on_write: RwLock<bool>,
    fail_on_read: RwLock<bool>,
    fail_on_audit: RwLock<bool>,
    fail_on_issue: RwLock<bool>,
    latency: RwLock<Option<Duration>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mutating call fails with `Unavailable`.
    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    pub async fn set_fail_on_read(&self, fail: bool) {
        *self.fail_on_read.write().await = fail;
    }

    /// Fail at the audit step of any write, after the ledger change was staged.
    pub async fn set_fail_on_audit(&self, fail: bool) {
        *self.fail_on_audit.write().await = fail;
    }

    /// Reward issuance fails with `Unavailable`; other writes still succeed.
    pub async fn set_fail_on_issue(&self, fail: bool) {
        *self.fail_on_issue.write().await = fail;
    }

    /// Sleep this long before every call.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().await = latency;
    }

    /// Number of audit entries across all pairs.
    pub async fn audit_len(&self) -> usize {
        self.state.lock().await.audit.len()
    }

    /// Overwrite a reward's expiry, for driving time-based transitions in tests.
    pub async fn set_expiry(&self, id: Uuid, expires_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let reward = state
            .rewards
            .get_mut(&id)
            .ok_or(StorageError::RewardNotFound(id))?;
        reward.expires_at = expires_at;
        Ok(())
    }

    async fn before_read(&self) -> Result<()> {
        self.pause().await;
        if *self.fail_on_read.read().await {
            return Err(StorageError::Unavailable("mock read failure".to_string()));
        }
        Ok(())
    }

    async fn before_write(&self) -> Result<()> {
        self.pause().await;
        if *self.fail_on_write.read().await {
            return Err(StorageError::Unavailable("mock write failure".to_string()));
        }
        Ok(())
    }

    async fn audit_fails(&self) -> bool {
        *self.fail_on_audit.read().await
    }

    async fn pause(&self) {
        let latency = *self.latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl LedgerStore for MockStore {
    async fn get_or_create(
        &self,
        customer_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<(LedgerEntry, bool)> {
        self.before_write().await?;
        let mut state = self.state.lock().await;
        if let Some(entry) = state.ledger.get(&(customer_id, tenant_id)) {
            return Ok((entry.clone(), false));
        }
        let entry = LedgerEntry::opening(customer_id, tenant_id, Utc::now());
        state.ledger.insert((customer_id, tenant_id), entry.clone());
        Ok((entry, true))
    }

    async fn get(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<Option<LedgerEntry>> {
        self.before_read().await?;
        let state = self.state.lock().await;
        Ok(state.ledger.get(&(customer_id, tenant_id)).cloned())
    }

    async fn apply_delta(&self, mutation: LedgerMutation) -> Result<AppliedDelta> {
        self.before_write().await?;
        let fail_audit = self.audit_fails().await;
        let mut state = self.state.lock().await;
        let key = (mutation.customer_id, mutation.tenant_id);
        let current = state
            .ledger
            .get(&key)
            .cloned()
            .ok_or(StorageError::LedgerNotFound {
                customer_id: mutation.customer_id,
                tenant_id: mutation.tenant_id,
            })?;

        if mutation.overdraft == OverdraftPolicy::Reject
            && current.total_points + mutation.delta < 0
        {
            return Err(StorageError::Overdraft {
                balance: current.total_points,
                delta: mutation.delta,
            });
        }
        if fail_audit {
            return Err(StorageError::Unavailable("mock audit failure".to_string()));
        }

        let now = Utc::now();
        let mut entry = current;
        entry.total_points += mutation.delta;
        entry.lifetime_points += mutation.delta.max(0);
        if mutation.visit {
            entry.visits_count += 1;
            entry.first_visit_at.get_or_insert(now);
            entry.last_visit_at = Some(now);
            entry.is_active = true;
        }
        state.ledger.insert(key, entry.clone());

        let audit = state.push_audit(
            NewAuditEntry {
                customer_id: mutation.customer_id,
                tenant_id: mutation.tenant_id,
                points_delta: mutation.delta,
                related_reward_code_id: None,
                attribution: mutation.attribution,
            },
            now,
        );

        Ok(AppliedDelta {
            entry,
            audit_id: audit.id,
        })
    }

    async fn list_for_customer(&self, customer_id: Uuid) -> Result<Vec<LedgerEntry>> {
        self.before_read().await?;
        let state = self.state.lock().await;
        let mut entries: Vec<LedgerEntry> = state
            .ledger
            .values()
            .filter(|e| e.customer_id == customer_id && e.is_active)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn deactivate(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<()> {
        self.before_write().await?;
        let mut state = self.state.lock().await;
        let entry = state
            .ledger
            .get_mut(&(customer_id, tenant_id))
            .ok_or(StorageError::LedgerNotFound {
                customer_id,
                tenant_id,
            })?;
        entry.is_active = false;
        Ok(())
    }
}

#[async_trait]
impl AuditLog for MockStore {
    async fn append(&self, entry: NewAuditEntry) -> Result<Uuid> {
        self.before_write().await?;
        if self.audit_fails().await {
            return Err(StorageError::Unavailable("mock audit failure".to_string()));
        }
        let mut state = self.state.lock().await;
        Ok(state.push_audit(entry, Utc::now()).id)
    }

    async fn list_for(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<Vec<AuditEntry>> {
        self.before_read().await?;
        let state = self.state.lock().await;
        Ok(state
            .audit
            .iter()
            .filter(|a| a.customer_id == customer_id && a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RewardStore for MockStore {
    async fn code_exists(&self, code: &str) -> Result<bool> {
        self.before_read().await?;
        Ok(self.state.lock().await.codes.contains(code))
    }

    async fn count_active(
        &self,
        customer_id: Uuid,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.before_read().await?;
        Ok(self
            .state
            .lock()
            .await
            .active_count(customer_id, tenant_id, now))
    }

    async fn issue(&self, request: IssueRequest) -> Result<IssuedReward> {
        self.before_write().await?;
        if *self.fail_on_issue.read().await {
            return Err(StorageError::Unavailable("mock issue failure".to_string()));
        }
        let fail_audit = self.audit_fails().await;
        let mut state = self.state.lock().await;
        let key = (request.customer_id, request.tenant_id);

        let entry = state
            .ledger
            .get(&key)
            .cloned()
            .ok_or(StorageError::LedgerNotFound {
                customer_id: request.customer_id,
                tenant_id: request.tenant_id,
            })?;
        if entry.total_points < request.points_required {
            return Err(StorageError::InsufficientPoints {
                available: entry.total_points,
                required: request.points_required,
            });
        }
        let active = state.active_count(request.customer_id, request.tenant_id, request.now);
        if active >= request.max_active_cards {
            return Err(StorageError::ActiveCardCap {
                active,
                cap: request.max_active_cards,
            });
        }
        if state.codes.contains(&request.code) {
            return Err(StorageError::CodeCollision(request.code));
        }
        if fail_audit {
            return Err(StorageError::Unavailable("mock audit failure".to_string()));
        }

        let reward = RewardCode {
            id: request.code_id,
            code: request.code.clone(),
            customer_id: request.customer_id,
            tenant_id: request.tenant_id,
            value: request.value,
            points_consumed: request.points_required,
            status: RewardStatus::Active,
            expires_at: request.expires_at,
            created_at: request.now,
            redeemed_at: None,
        };
        state.codes.insert(request.code.clone());
        state.rewards.insert(reward.id, reward.clone());

        let mut entry = entry;
        entry.total_points -= request.points_required;
        state.ledger.insert(key, entry.clone());

        let audit = state.push_audit(
            NewAuditEntry {
                customer_id: request.customer_id,
                tenant_id: request.tenant_id,
                points_delta: -request.points_required,
                related_reward_code_id: Some(reward.id),
                attribution: Attribution::system(format!("Reward code {} issued", request.code)),
            },
            request.now,
        );

        Ok(IssuedReward {
            reward,
            entry,
            audit_id: audit.id,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<RewardCode>> {
        self.before_read().await?;
        Ok(self.state.lock().await.rewards.get(&id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<RewardCode>> {
        self.before_read().await?;
        let state = self.state.lock().await;
        Ok(state.rewards.values().find(|r| r.code == code).cloned())
    }

    async fn list_for(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<Vec<RewardCode>> {
        self.before_read().await?;
        let state = self.state.lock().await;
        let mut rewards: Vec<RewardCode> = state
            .rewards
            .values()
            .filter(|r| r.customer_id == customer_id && r.tenant_id == tenant_id)
            .cloned()
            .collect();
        rewards.sort_by_key(|r| r.created_at);
        Ok(rewards)
    }

    async fn redeem(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        attribution: Attribution,
    ) -> Result<Redemption> {
        self.before_write().await?;
        let fail_audit = self.audit_fails().await;
        let mut state = self.state.lock().await;
        let reward = state
            .rewards
            .get(&id)
            .cloned()
            .ok_or(StorageError::RewardNotFound(id))?;
        if reward.status != RewardStatus::Active {
            return Err(StorageError::InvalidTransition {
                id,
                status: reward.status,
            });
        }
        if now >= reward.expires_at {
            return Err(StorageError::PastExpiry {
                id,
                expires_at: reward.expires_at,
            });
        }
        if fail_audit {
            return Err(StorageError::Unavailable("mock audit failure".to_string()));
        }

        let mut reward = reward;
        reward.status = RewardStatus::Redeemed;
        reward.redeemed_at = Some(now);
        state.rewards.insert(id, reward.clone());

        let audit = state.push_audit(
            NewAuditEntry {
                customer_id: reward.customer_id,
                tenant_id: reward.tenant_id,
                points_delta: 0,
                related_reward_code_id: Some(id),
                attribution,
            },
            now,
        );

        Ok(Redemption { reward, audit })
    }

    async fn cancel(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        attribution: Attribution,
    ) -> Result<RewardCode> {
        self.before_write().await?;
        let fail_audit = self.audit_fails().await;
        let mut state = self.state.lock().await;
        let reward = state
            .rewards
            .get(&id)
            .cloned()
            .ok_or(StorageError::RewardNotFound(id))?;
        if reward.status != RewardStatus::Active {
            return Err(StorageError::InvalidTransition {
                id,
                status: reward.status,
            });
        }
        if fail_audit {
            return Err(StorageError::Unavailable("mock audit failure".to_string()));
        }

        let mut reward = reward;
        reward.status = RewardStatus::Cancelled;
        state.rewards.insert(id, reward.clone());
        state.push_audit(
            NewAuditEntry {
                customer_id: reward.customer_id,
                tenant_id: reward.tenant_id,
                points_delta: 0,
                related_reward_code_id: Some(id),
                attribution,
            },
            now,
        );
        Ok(reward)
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<RewardCode>> {
        self.before_write().await?;
        let mut state = self.state.lock().await;
        let mut expired = Vec::new();
        for reward in state.rewards.values_mut() {
            if reward.status == RewardStatus::Active && reward.expires_at <= now {
                reward.status = RewardStatus::Expired;
                expired.push(reward.clone());
            }
        }
        Ok(expired)
    }
}

#[async_trait]
impl SettingsStore for MockStore {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<RewardSettings>> {
        self.before_read().await?;
        Ok(self.state.lock().await.settings.get(&tenant_id).cloned())
    }

    async fn put(&self, tenant_id: Uuid, settings: &RewardSettings) -> Result<()> {
        self.before_write().await?;
        self.state
            .lock()
            .await
            .settings
            .insert(tenant_id, settings.clone());
        Ok(())
    }
}

#[async_trait]
impl Directory for MockStore {
    async fn create_tenant(&self, name: &str) -> Result<Tenant> {
        self.before_write().await?;
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
        };
        self.state
            .lock()
            .await
            .tenants
            .insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        self.before_read().await?;
        Ok(self.state.lock().await.tenants.get(&id).cloned())
    }

    async fn tenant_by_name(&self, name: &str) -> Result<Option<Tenant>> {
        self.before_read().await?;
        let key = name_key(name);
        let state = self.state.lock().await;
        Ok(state
            .tenants
            .values()
            .find(|t| name_key(&t.name) == key)
            .cloned())
    }

    async fn create_branch(&self, tenant_id: Uuid, name: &str) -> Result<Branch> {
        self.before_write().await?;
        let branch = Branch {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.trim().to_string(),
        };
        self.state
            .lock()
            .await
            .branches
            .insert(branch.id, branch.clone());
        Ok(branch)
    }

    async fn branch_by_name(&self, tenant_id: Uuid, name: &str) -> Result<Option<Branch>> {
        self.before_read().await?;
        let key = name_key(name);
        let state = self.state.lock().await;
        Ok(state
            .branches
            .values()
            .find(|b| b.tenant_id == tenant_id && name_key(&b.name) == key)
            .cloned())
    }

    async fn customer(&self, id: Uuid) -> Result<Option<Customer>> {
        self.before_read().await?;
        Ok(self.state.lock().await.customers.get(&id).cloned())
    }

    async fn customer_by_identity(&self, identity: &str) -> Result<Option<Customer>> {
        self.before_read().await?;
        let state = self.state.lock().await;
        Ok(state
            .customers
            .values()
            .find(|c| c.identity == identity)
            .cloned())
    }

    async fn ensure_customer(&self, identity: &str) -> Result<Customer> {
        self.before_write().await?;
        let mut state = self.state.lock().await;
        if let Some(existing) = state.customers.values().find(|c| c.identity == identity) {
            return Ok(existing.clone());
        }
        let customer = Customer {
            id: Uuid::new_v4(),
            identity: identity.to_string(),
            display_name: None,
            email: None,
            opted_out: false,
            created_at: Utc::now(),
        };
        state.customers.insert(customer.id, customer.clone());
        Ok(customer)
    }

    async fn set_opted_out(&self, customer_id: Uuid, opted_out: bool) -> Result<()> {
        self.before_write().await?;
        let mut state = self.state.lock().await;
        let customer = state.customers.get_mut(&customer_id).ok_or_else(|| {
            StorageError::InvalidRecord(format!("customer {} does not exist", customer_id))
        })?;
        customer.opted_out = opted_out;
        Ok(())
    }

    async fn update_profile(&self, customer_id: Uuid, profile: &ProfileUpdate) -> Result<()> {
        self.before_write().await?;
        let mut state = self.state.lock().await;
        let customer = state.customers.get_mut(&customer_id).ok_or_else(|| {
            StorageError::InvalidRecord(format!("customer {} does not exist", customer_id))
        })?;
        if let Some(name) = &profile.display_name {
            customer.display_name = Some(name.clone());
        }
        if let Some(email) = &profile.email {
            customer.email = Some(email.clone());
        }
        Ok(())
    }

    async fn record_inbound_event(
        &self,
        message_id: &str,
        received_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.before_write().await?;
        let mut state = self.state.lock().await;
        if state.processed_events.contains_key(message_id) {
            return Ok(false);
        }
        state
            .processed_events
            .insert(message_id.to_string(), received_at);
        Ok(true)
    }

    async fn forget_inbound_event(&self, message_id: &str) -> Result<()> {
        self.before_write().await?;
        self.state.lock().await.processed_events.remove(message_id);
        Ok(())
    }

    async fn prune_inbound_events(&self, before: DateTime<Utc>) -> Result<u64> {
        self.before_write().await?;
        let mut state = self.state.lock().await;
        let len = state.processed_events.len();
        state
            .processed_events
            .retain(|_, received_at| *received_at >= before);
        Ok((len - state.processed_events.len()) as u64)
    }
}

#[cfg(test)]
mod tests;
