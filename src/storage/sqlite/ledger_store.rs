//! SQLite LedgerStore implementation.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use uuid::Uuid;

use super::{insert_audit, ledger_from_row, SqliteStore, LEDGER_COLUMNS};
use crate::model::{LedgerEntry, NewAuditEntry};
use crate::storage::helpers::format_timestamp;
use crate::storage::schema::LedgerEntries;
use crate::storage::{
    AppliedDelta, LedgerMutation, LedgerStore, OverdraftPolicy, Result, StorageError,
};

fn ledger_columns() -> [LedgerEntries; 9] {
    [
        LedgerEntries::CustomerId,
        LedgerEntries::TenantId,
        LedgerEntries::TotalPoints,
        LedgerEntries::LifetimePoints,
        LedgerEntries::VisitsCount,
        LedgerEntries::FirstVisitAt,
        LedgerEntries::LastVisitAt,
        LedgerEntries::IsActive,
        LedgerEntries::CreatedAt,
    ]
}

/// Increment in place; the overdraft guard is part of the WHERE clause so a
/// rejected delta matches no row.
fn apply_delta_sql() -> String {
    format!(
        "UPDATE ledger_entries SET \
             total_points = total_points + ?1, \
             lifetime_points = lifetime_points + MAX(?1, 0), \
             visits_count = visits_count + ?2, \
             first_visit_at = CASE WHEN ?2 = 1 THEN COALESCE(first_visit_at, ?3) ELSE first_visit_at END, \
             last_visit_at = CASE WHEN ?2 = 1 THEN ?3 ELSE last_visit_at END, \
             is_active = CASE WHEN ?2 = 1 THEN 1 ELSE is_active END, \
             updated_at = ?3 \
         WHERE customer_id = ?4 AND tenant_id = ?5 \
           AND (?6 = 1 OR total_points + ?1 >= 0) \
         RETURNING {}",
        LEDGER_COLUMNS
    )
}

impl SqliteStore {
    pub(super) async fn select_ledger(
        conn: &mut sqlx::SqliteConnection,
        customer_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<LedgerEntry>> {
        let (sql, values) = Query::select()
            .columns(ledger_columns())
            .from(LedgerEntries::Table)
            .and_where(Expr::col(LedgerEntries::CustomerId).eq(customer_id.to_string()))
            .and_where(Expr::col(LedgerEntries::TenantId).eq(tenant_id.to_string()))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(ledger_from_row).transpose()
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn get_or_create(
        &self,
        customer_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<(LedgerEntry, bool)> {
        let now = format_timestamp(Utc::now());
        let (sql, values) = Query::insert()
            .into_table(LedgerEntries::Table)
            .columns([
                LedgerEntries::CustomerId,
                LedgerEntries::TenantId,
                LedgerEntries::CreatedAt,
                LedgerEntries::UpdatedAt,
            ])
            .values_panic([
                customer_id.to_string().into(),
                tenant_id.to_string().into(),
                now.clone().into(),
                now.into(),
            ])
            .on_conflict(
                OnConflict::columns([LedgerEntries::CustomerId, LedgerEntries::TenantId])
                    .do_nothing()
                    .to_owned(),
            )
            .build_sqlx(SqliteQueryBuilder);

        let mut conn = self.pool.acquire().await?;
        let created = sqlx::query_with(&sql, values)
            .execute(&mut *conn)
            .await?
            .rows_affected()
            == 1;

        let entry = Self::select_ledger(&mut *conn, customer_id, tenant_id)
            .await?
            .ok_or(StorageError::LedgerNotFound {
                customer_id,
                tenant_id,
            })?;
        Ok((entry, created))
    }

    async fn get(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<Option<LedgerEntry>> {
        let mut conn = self.pool.acquire().await?;
        Self::select_ledger(&mut *conn, customer_id, tenant_id).await
    }

    async fn apply_delta(&self, mutation: LedgerMutation) -> Result<AppliedDelta> {
        let now = Utc::now();
        let now_str = format_timestamp(now);
        let allow_overdraft = mutation.overdraft == OverdraftPolicy::Allow;

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&apply_delta_sql())
            .bind(mutation.delta)
            .bind(mutation.visit as i64)
            .bind(&now_str)
            .bind(mutation.customer_id.to_string())
            .bind(mutation.tenant_id.to_string())
            .bind(allow_overdraft as i64)
            .fetch_optional(&mut *tx)
            .await?;

        let entry = match row {
            Some(row) => ledger_from_row(&row)?,
            None => {
                let current =
                    Self::select_ledger(&mut *tx, mutation.customer_id, mutation.tenant_id).await?;
                // Dropping the transaction rolls it back.
                return Err(match current {
                    Some(current) => StorageError::Overdraft {
                        balance: current.total_points,
                        delta: mutation.delta,
                    },
                    None => StorageError::LedgerNotFound {
                        customer_id: mutation.customer_id,
                        tenant_id: mutation.tenant_id,
                    },
                });
            }
        };

        let audit = insert_audit(
            &mut *tx,
            &NewAuditEntry {
                customer_id: mutation.customer_id,
                tenant_id: mutation.tenant_id,
                points_delta: mutation.delta,
                related_reward_code_id: None,
                attribution: mutation.attribution,
            },
            now,
        )
        .await?;

        tx.commit().await?;

        Ok(AppliedDelta {
            entry,
            audit_id: audit.id,
        })
    }

    async fn list_for_customer(&self, customer_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let (sql, values) = Query::select()
            .columns(ledger_columns())
            .from(LedgerEntries::Table)
            .and_where(Expr::col(LedgerEntries::CustomerId).eq(customer_id.to_string()))
            .and_where(Expr::col(LedgerEntries::IsActive).eq(true))
            .order_by(LedgerEntries::CreatedAt, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(ledger_from_row).collect()
    }

    async fn deactivate(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<()> {
        let (sql, values) = Query::update()
            .table(LedgerEntries::Table)
            .value(LedgerEntries::IsActive, false)
            .value(LedgerEntries::UpdatedAt, format_timestamp(Utc::now()))
            .and_where(Expr::col(LedgerEntries::CustomerId).eq(customer_id.to_string()))
            .and_where(Expr::col(LedgerEntries::TenantId).eq(tenant_id.to_string()))
            .build_sqlx(SqliteQueryBuilder);

        let affected = sqlx::query_with(&sql, values)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(StorageError::LedgerNotFound {
                customer_id,
                tenant_id,
            });
        }
        Ok(())
    }
}
