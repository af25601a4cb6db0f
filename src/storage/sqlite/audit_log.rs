//! SQLite AuditLog implementation.
//!
//! The table is guarded by triggers that abort any UPDATE or DELETE, so the
//! only way in is [`insert_audit`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::{audit_from_row, SqliteStore};
use crate::model::{AuditEntry, NewAuditEntry};
use crate::storage::helpers::format_timestamp;
use crate::storage::schema::AuditEntries;
use crate::storage::{AuditLog, Result};

/// Insert an audit entry on a connection that may be inside a transaction.
pub(crate) async fn insert_audit(
    conn: &mut SqliteConnection,
    entry: &NewAuditEntry,
    now: DateTime<Utc>,
) -> Result<AuditEntry> {
    let audit = AuditEntry::from_new(Uuid::new_v4(), entry.clone(), now);

    let (sql, values) = Query::insert()
        .into_table(AuditEntries::Table)
        .columns([
            AuditEntries::Id,
            AuditEntries::CustomerId,
            AuditEntries::TenantId,
            AuditEntries::PointsDelta,
            AuditEntries::RelatedRewardCodeId,
            AuditEntries::OperatorId,
            AuditEntries::ApproverId,
            AuditEntries::Note,
            AuditEntries::CreatedAt,
        ])
        .values_panic([
            audit.id.to_string().into(),
            audit.customer_id.to_string().into(),
            audit.tenant_id.to_string().into(),
            audit.points_delta.into(),
            audit.related_reward_code_id.map(|id| id.to_string()).into(),
            audit.operator_id.map(|id| id.to_string()).into(),
            audit.approver_id.map(|id| id.to_string()).into(),
            audit.note.clone().into(),
            format_timestamp(now).into(),
        ])
        .build_sqlx(SqliteQueryBuilder);

    sqlx::query_with(&sql, values).execute(&mut *conn).await?;
    Ok(audit)
}

#[async_trait]
impl AuditLog for SqliteStore {
    async fn append(&self, entry: NewAuditEntry) -> Result<Uuid> {
        let mut conn = self.pool.acquire().await?;
        let audit = insert_audit(&mut *conn, &entry, Utc::now()).await?;
        Ok(audit.id)
    }

    async fn list_for(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<Vec<AuditEntry>> {
        let (sql, values) = Query::select()
            .columns([
                AuditEntries::Id,
                AuditEntries::CustomerId,
                AuditEntries::TenantId,
                AuditEntries::PointsDelta,
                AuditEntries::RelatedRewardCodeId,
                AuditEntries::OperatorId,
                AuditEntries::ApproverId,
                AuditEntries::Note,
                AuditEntries::CreatedAt,
            ])
            .from(AuditEntries::Table)
            .and_where(Expr::col(AuditEntries::CustomerId).eq(customer_id.to_string()))
            .and_where(Expr::col(AuditEntries::TenantId).eq(tenant_id.to_string()))
            .order_by(AuditEntries::Seq, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(audit_from_row).collect()
    }
}
