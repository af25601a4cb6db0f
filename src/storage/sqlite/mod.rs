//! SQLite implementations of storage interfaces.
//!
//! One pool serves every trait. The database runs in WAL mode with a busy
//! timeout; each write transaction opens with a write statement so SQLite
//! takes the reserved lock up front instead of upgrading a read lock later.

use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;

use super::helpers::{
    parse_optional_timestamp, parse_optional_uuid, parse_status, parse_timestamp, parse_uuid,
};
use super::Result;
use crate::config::SqliteConfig;
use crate::model::{AuditEntry, Branch, Customer, LedgerEntry, RewardCode, Tenant};

mod audit_log;
mod directory;
mod ledger_store;
mod reward_store;
mod settings_store;

pub(crate) use audit_log::insert_audit;

/// SQLite-backed store implementing every storage trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database file described by `config`.
    pub async fn connect(config: &SqliteConfig) -> Result<Self> {
        let in_memory = config.path == ":memory:";
        if !in_memory {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        super::StorageError::Unavailable(format!(
                            "cannot create {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
        }

        let opts = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .foreign_keys(true);

        // Every connection to ":memory:" is a separate database.
        let max_connections = if in_memory { 1 } else { config.max_connections };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        Ok(Self::new(pool))
    }

    /// Create tables, indexes and triggers if they do not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(super::schema::CREATE_SCHEMA)
            .execute(&self.pool)
            .await?;
        info!("SQLite schema initialized");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ============================================================================
// Row mapping
// ============================================================================

pub(crate) const LEDGER_COLUMNS: &str = "customer_id, tenant_id, total_points, lifetime_points, \
     visits_count, first_visit_at, last_visit_at, is_active, created_at";

pub(crate) const REWARD_COLUMNS: &str = "id, code, customer_id, tenant_id, value, \
     points_consumed, status, expires_at, created_at, redeemed_at";

pub(crate) fn ledger_from_row(row: &SqliteRow) -> Result<LedgerEntry> {
    Ok(LedgerEntry {
        customer_id: parse_uuid(row.try_get("customer_id")?)?,
        tenant_id: parse_uuid(row.try_get("tenant_id")?)?,
        total_points: row.try_get("total_points")?,
        lifetime_points: row.try_get("lifetime_points")?,
        visits_count: row.try_get("visits_count")?,
        first_visit_at: parse_optional_timestamp(row.try_get("first_visit_at")?)?,
        last_visit_at: parse_optional_timestamp(row.try_get("last_visit_at")?)?,
        is_active: row.try_get("is_active")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

pub(crate) fn reward_from_row(row: &SqliteRow) -> Result<RewardCode> {
    Ok(RewardCode {
        id: parse_uuid(row.try_get("id")?)?,
        code: row.try_get("code")?,
        customer_id: parse_uuid(row.try_get("customer_id")?)?,
        tenant_id: parse_uuid(row.try_get("tenant_id")?)?,
        value: row.try_get("value")?,
        points_consumed: row.try_get("points_consumed")?,
        status: parse_status(row.try_get("status")?)?,
        expires_at: parse_timestamp(row.try_get("expires_at")?)?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
        redeemed_at: parse_optional_timestamp(row.try_get("redeemed_at")?)?,
    })
}

pub(crate) fn audit_from_row(row: &SqliteRow) -> Result<AuditEntry> {
    Ok(AuditEntry {
        id: parse_uuid(row.try_get("id")?)?,
        customer_id: parse_uuid(row.try_get("customer_id")?)?,
        tenant_id: parse_uuid(row.try_get("tenant_id")?)?,
        points_delta: row.try_get("points_delta")?,
        related_reward_code_id: parse_optional_uuid(row.try_get("related_reward_code_id")?)?,
        operator_id: parse_optional_uuid(row.try_get("operator_id")?)?,
        approver_id: parse_optional_uuid(row.try_get("approver_id")?)?,
        note: row.try_get("note")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

pub(crate) fn tenant_from_row(row: &SqliteRow) -> Result<Tenant> {
    Ok(Tenant {
        id: parse_uuid(row.try_get("id")?)?,
        name: row.try_get("name")?,
    })
}

pub(crate) fn branch_from_row(row: &SqliteRow) -> Result<Branch> {
    Ok(Branch {
        id: parse_uuid(row.try_get("id")?)?,
        tenant_id: parse_uuid(row.try_get("tenant_id")?)?,
        name: row.try_get("name")?,
    })
}

pub(crate) fn customer_from_row(row: &SqliteRow) -> Result<Customer> {
    Ok(Customer {
        id: parse_uuid(row.try_get("id")?)?,
        identity: row.try_get("identity")?,
        display_name: row.try_get("display_name")?,
        email: row.try_get("email")?,
        opted_out: row.try_get("opted_out")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}
