//! Storage interfaces and implementations.
//!
//! Every ledger mutation goes through these traits. Implementations must make
//! each method atomic on its own: a ledger delta and the audit entry that
//! records it commit together, a reward issuance re-validates the balance and
//! the active-card cap inside the same transaction that decrements it, and a
//! redemption flips the status and writes its audit record in one step.
//!
//! Implementations:
//! - `SqliteStore`: SQLite via sqlx (feature `sqlite`)
//! - `MockStore`: in-memory, with failure and latency injection for tests

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{StorageConfig, StorageType};
use crate::model::{
    Attribution, AuditEntry, Branch, Customer, LedgerEntry, NewAuditEntry, RewardCode,
    RewardStatus, Tenant,
};
use crate::rewards::RewardSettings;

pub mod helpers;
pub mod mock;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::MockStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

// ============================================================================
// Errors
// ============================================================================

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Ledger entry not found: customer={customer_id}, tenant={tenant_id}")]
    LedgerNotFound { customer_id: Uuid, tenant_id: Uuid },

    #[error("Reward code not found: {0}")]
    RewardNotFound(Uuid),

    #[error("Overdraft rejected: balance {balance}, delta {delta}")]
    Overdraft { balance: i64, delta: i64 },

    #[error("Reward code already exists: {0}")]
    CodeCollision(String),

    #[error("Insufficient points: have {available}, need {required}")]
    InsufficientPoints { available: i64, required: i64 },

    #[error("Active card cap reached: {active} of {cap}")]
    ActiveCardCap { active: i64, cap: i64 },

    #[error("Reward code {id} is {status}")]
    InvalidTransition { id: Uuid, status: RewardStatus },

    #[error("Reward code {id} expired at {expires_at}")]
    PastExpiry { id: Uuid, expires_at: DateTime<Utc> },

    #[error("Storage operation timed out: {operation}")]
    Timeout { operation: &'static str },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ============================================================================
// Request/response types
// ============================================================================

/// Whether a delta may drive `total_points` below zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverdraftPolicy {
    #[default]
    Reject,
    Allow,
}

/// A signed point change together with the audit attribution recording it.
#[derive(Debug, Clone)]
pub struct LedgerMutation {
    pub customer_id: Uuid,
    pub tenant_id: Uuid,
    pub delta: i64,
    /// Counts a visit and stamps `last_visit_at`, independent of the delta sign.
    pub visit: bool,
    pub overdraft: OverdraftPolicy,
    pub attribution: Attribution,
}

/// Ledger state after a committed mutation.
#[derive(Debug, Clone)]
pub struct AppliedDelta {
    pub entry: LedgerEntry,
    pub audit_id: Uuid,
}

/// One reward code to mint from an existing balance.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub code_id: Uuid,
    pub code: String,
    pub customer_id: Uuid,
    pub tenant_id: Uuid,
    pub value: i64,
    pub points_required: i64,
    pub max_active_cards: i64,
    pub expires_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

/// A committed issuance: the code, the ledger after deduction, and the audit id.
#[derive(Debug, Clone)]
pub struct IssuedReward {
    pub reward: RewardCode,
    pub entry: LedgerEntry,
    pub audit_id: Uuid,
}

/// A committed redemption.
#[derive(Debug, Clone)]
pub struct Redemption {
    pub reward: RewardCode,
    pub audit: AuditEntry,
}

/// Optional profile fields sent by the customer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.email.is_none()
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Per-(customer, tenant) balance records.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fetch the entry, creating a zero-balance one if the pair is new.
    ///
    /// Returns `true` alongside the entry when it was created by this call.
    async fn get_or_create(&self, customer_id: Uuid, tenant_id: Uuid)
        -> Result<(LedgerEntry, bool)>;

    async fn get(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<Option<LedgerEntry>>;

    /// Atomically add `delta` to the balance and append the matching audit entry.
    ///
    /// The increment happens in the storage layer; concurrent calls for the
    /// same pair are all reflected in the final balance.
    async fn apply_delta(&self, mutation: LedgerMutation) -> Result<AppliedDelta>;

    /// All entries for a customer across tenants, active ones only.
    async fn list_for_customer(&self, customer_id: Uuid) -> Result<Vec<LedgerEntry>>;

    async fn deactivate(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<()>;
}

/// Append-only record of point deltas.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: NewAuditEntry) -> Result<Uuid>;

    /// Entries for a pair, oldest first.
    async fn list_for(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<Vec<AuditEntry>>;
}

/// Reward code persistence and state transitions.
#[async_trait]
pub trait RewardStore: Send + Sync {
    async fn code_exists(&self, code: &str) -> Result<bool>;

    /// Codes with status `active` whose expiry is after `now`.
    async fn count_active(&self, customer_id: Uuid, tenant_id: Uuid, now: DateTime<Utc>)
        -> Result<i64>;

    /// Insert the code, deduct `points_required` and append a negative audit
    /// entry, all in one transaction. The balance and the active-card cap are
    /// re-validated inside that transaction.
    async fn issue(&self, request: IssueRequest) -> Result<IssuedReward>;

    async fn get(&self, id: Uuid) -> Result<Option<RewardCode>>;

    async fn find_by_code(&self, code: &str) -> Result<Option<RewardCode>>;

    async fn list_for(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<Vec<RewardCode>>;

    /// `active -> redeemed` plus the redemption audit record, atomically.
    ///
    /// Fails without writing if the code is not active or `now >= expires_at`.
    async fn redeem(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        attribution: Attribution,
    ) -> Result<Redemption>;

    /// `active -> cancelled` plus a zero-delta audit record, atomically.
    async fn cancel(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        attribution: Attribution,
    ) -> Result<RewardCode>;

    /// Move every active code with `expires_at <= now` to `expired`.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<RewardCode>>;
}

/// Tenant-specific reward configuration.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<RewardSettings>>;

    async fn put(&self, tenant_id: Uuid, settings: &RewardSettings) -> Result<()>;
}

/// Tenants, branches, customers and inbound-event dedup.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn create_tenant(&self, name: &str) -> Result<Tenant>;

    async fn tenant(&self, id: Uuid) -> Result<Option<Tenant>>;

    /// Case-insensitive exact match on the tenant name.
    async fn tenant_by_name(&self, name: &str) -> Result<Option<Tenant>>;

    async fn create_branch(&self, tenant_id: Uuid, name: &str) -> Result<Branch>;

    /// Case-insensitive exact match, scoped to the tenant.
    async fn branch_by_name(&self, tenant_id: Uuid, name: &str) -> Result<Option<Branch>>;

    async fn customer(&self, id: Uuid) -> Result<Option<Customer>>;

    async fn customer_by_identity(&self, identity: &str) -> Result<Option<Customer>>;

    async fn ensure_customer(&self, identity: &str) -> Result<Customer>;

    async fn set_opted_out(&self, customer_id: Uuid, opted_out: bool) -> Result<()>;

    async fn update_profile(&self, customer_id: Uuid, profile: &ProfileUpdate) -> Result<()>;

    /// Record a provider message id. Returns `false` if it was already seen.
    async fn record_inbound_event(&self, message_id: &str, received_at: DateTime<Utc>)
        -> Result<bool>;

    /// Drop a recorded message id so a redelivery is processed again.
    /// Unknown ids are ignored.
    async fn forget_inbound_event(&self, message_id: &str) -> Result<()>;

    /// Drop message ids received before `before`. Returns how many were removed.
    async fn prune_inbound_events(&self, before: DateTime<Utc>) -> Result<u64>;
}

// ============================================================================
// Store handle
// ============================================================================

/// Explicit handle to every store, passed into each service.
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn LedgerStore>,
    pub audit: Arc<dyn AuditLog>,
    pub rewards: Arc<dyn RewardStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub directory: Arc<dyn Directory>,
}

impl Stores {
    /// Use one backend object for every store trait.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: LedgerStore + AuditLog + RewardStore + SettingsStore + Directory + 'static,
    {
        Self {
            ledger: backend.clone(),
            audit: backend.clone(),
            rewards: backend.clone(),
            settings: backend.clone(),
            directory: backend,
        }
    }

    /// In-memory stores, for tests and local experiments.
    pub fn memory() -> (Self, Arc<MockStore>) {
        let backend = Arc::new(MockStore::new());
        (Self::from_backend(backend.clone()), backend)
    }
}

/// Run a storage future with an upper bound on its duration.
///
/// Expiry surfaces as [`StorageError::Timeout`] rather than hanging the caller.
pub async fn bounded<T, F>(timeout: Duration, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "Storage operation timed out"
            );
            Err(StorageError::Timeout { operation })
        }
    }
}

/// Initialize storage based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Stores, Box<dyn std::error::Error>> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Storage: in-memory");
            Ok(Stores::memory().0)
        }
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            info!("Storage: sqlite at {}", config.sqlite.path);
            let store = SqliteStore::connect(&config.sqlite).await?;
            store.init().await?;
            Ok(Stores::from_backend(Arc::new(store)))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
    }
}
