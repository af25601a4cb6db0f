//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Tenants table schema.
#[derive(Iden)]
pub enum Tenants {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "name_key"]
    NameKey,
    #[iden = "created_at"]
    CreatedAt,
}

/// Branches table schema.
#[derive(Iden)]
pub enum Branches {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "name"]
    Name,
    #[iden = "name_key"]
    NameKey,
    #[iden = "created_at"]
    CreatedAt,
}

/// Customers table schema.
#[derive(Iden)]
pub enum Customers {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "identity"]
    Identity,
    #[iden = "display_name"]
    DisplayName,
    #[iden = "email"]
    Email,
    #[iden = "opted_out"]
    OptedOut,
    #[iden = "created_at"]
    CreatedAt,
}

/// Ledger entries table schema.
#[derive(Iden)]
pub enum LedgerEntries {
    Table,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "total_points"]
    TotalPoints,
    #[iden = "lifetime_points"]
    LifetimePoints,
    #[iden = "visits_count"]
    VisitsCount,
    #[iden = "first_visit_at"]
    FirstVisitAt,
    #[iden = "last_visit_at"]
    LastVisitAt,
    #[iden = "is_active"]
    IsActive,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Audit entries table schema.
#[derive(Iden)]
pub enum AuditEntries {
    Table,
    #[iden = "seq"]
    Seq,
    #[iden = "id"]
    Id,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "points_delta"]
    PointsDelta,
    #[iden = "related_reward_code_id"]
    RelatedRewardCodeId,
    #[iden = "operator_id"]
    OperatorId,
    #[iden = "approver_id"]
    ApproverId,
    #[iden = "note"]
    Note,
    #[iden = "created_at"]
    CreatedAt,
}

/// Reward codes table schema.
#[derive(Iden)]
pub enum RewardCodes {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "code"]
    Code,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "value"]
    Value,
    #[iden = "points_consumed"]
    PointsConsumed,
    #[iden = "status"]
    Status,
    #[iden = "expires_at"]
    ExpiresAt,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "redeemed_at"]
    RedeemedAt,
}

/// Reward settings table schema.
#[derive(Iden)]
pub enum RewardSettingsTable {
    #[iden = "reward_settings"]
    Table,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "points_required"]
    PointsRequired,
    #[iden = "card_value"]
    CardValue,
    #[iden = "expiration_days"]
    ExpirationDays,
    #[iden = "max_active_cards"]
    MaxActiveCards,
    #[iden = "checkin_points"]
    CheckinPoints,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Processed inbound events (dedup) table schema.
#[derive(Iden)]
pub enum ProcessedEvents {
    Table,
    #[iden = "message_id"]
    MessageId,
    #[iden = "received_at"]
    ReceivedAt,
}

/// SQL for creating every table, index and guard trigger.
pub const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    name_key TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS branches (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id),
    name TEXT NOT NULL,
    name_key TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (tenant_id, name_key)
);

CREATE TABLE IF NOT EXISTS customers (
    id TEXT PRIMARY KEY,
    identity TEXT NOT NULL UNIQUE,
    display_name TEXT,
    email TEXT,
    opted_out INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ledger_entries (
    customer_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    total_points INTEGER NOT NULL DEFAULT 0,
    lifetime_points INTEGER NOT NULL DEFAULT 0,
    visits_count INTEGER NOT NULL DEFAULT 0,
    first_visit_at TEXT,
    last_visit_at TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (customer_id, tenant_id)
);

CREATE TABLE IF NOT EXISTS audit_entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    customer_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    points_delta INTEGER NOT NULL,
    related_reward_code_id TEXT,
    operator_id TEXT,
    approver_id TEXT,
    note TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_entries_pair ON audit_entries(customer_id, tenant_id);

CREATE TRIGGER IF NOT EXISTS audit_entries_no_update
BEFORE UPDATE ON audit_entries
BEGIN
    SELECT RAISE(ABORT, 'audit entries are append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_entries_no_delete
BEFORE DELETE ON audit_entries
BEGIN
    SELECT RAISE(ABORT, 'audit entries are append-only');
END;

CREATE TABLE IF NOT EXISTS reward_codes (
    id TEXT PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    customer_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    value INTEGER NOT NULL,
    points_consumed INTEGER NOT NULL,
    status TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    redeemed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_reward_codes_pair_status
    ON reward_codes(customer_id, tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_reward_codes_status_expiry
    ON reward_codes(status, expires_at);

CREATE TABLE IF NOT EXISTS reward_settings (
    tenant_id TEXT PRIMARY KEY,
    points_required INTEGER NOT NULL,
    card_value INTEGER NOT NULL,
    expiration_days INTEGER NOT NULL,
    max_active_cards INTEGER NOT NULL,
    checkin_points INTEGER,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS processed_events (
    message_id TEXT PRIMARY KEY,
    received_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_processed_events_received
    ON processed_events (received_at);
"#;
