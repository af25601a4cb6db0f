//! SQLite RewardStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{
    insert_audit, ledger_from_row, reward_from_row, SqliteStore, LEDGER_COLUMNS, REWARD_COLUMNS,
};
use crate::model::{Attribution, NewAuditEntry, RewardCode, RewardStatus};
use crate::storage::helpers::format_timestamp;
use crate::storage::schema::RewardCodes;
use crate::storage::{IssueRequest, IssuedReward, Redemption, Result, RewardStore, StorageError};

fn reward_columns() -> [RewardCodes; 10] {
    [
        RewardCodes::Id,
        RewardCodes::Code,
        RewardCodes::CustomerId,
        RewardCodes::TenantId,
        RewardCodes::Value,
        RewardCodes::PointsConsumed,
        RewardCodes::Status,
        RewardCodes::ExpiresAt,
        RewardCodes::CreatedAt,
        RewardCodes::RedeemedAt,
    ]
}

/// Conditional decrement: matches no row when the balance is short.
fn deduct_sql() -> String {
    format!(
        "UPDATE ledger_entries SET total_points = total_points - ?1, updated_at = ?2 \
         WHERE customer_id = ?3 AND tenant_id = ?4 AND total_points >= ?1 \
         RETURNING {}",
        LEDGER_COLUMNS
    )
}

/// Guarded `active -> <to>` transition; matches no row when the guard fails.
fn transition_sql(require_unexpired: bool) -> String {
    let expiry_guard = if require_unexpired {
        " AND expires_at > ?3"
    } else {
        ""
    };
    format!(
        "UPDATE reward_codes SET status = ?1, \
             redeemed_at = CASE WHEN ?1 = 'redeemed' THEN ?3 ELSE redeemed_at END \
         WHERE id = ?2 AND status = 'active'{} \
         RETURNING {}",
        expiry_guard, REWARD_COLUMNS
    )
}

impl SqliteStore {
    async fn select_reward(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<RewardCode>> {
        let (sql, values) = Query::select()
            .columns(reward_columns())
            .from(RewardCodes::Table)
            .and_where(Expr::col(RewardCodes::Id).eq(id.to_string()))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(reward_from_row).transpose()
    }

    async fn count_live(
        conn: &mut SqliteConnection,
        customer_id: Uuid,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let (sql, values) = Query::select()
            .expr(Expr::col(RewardCodes::Id).count())
            .from(RewardCodes::Table)
            .and_where(Expr::col(RewardCodes::CustomerId).eq(customer_id.to_string()))
            .and_where(Expr::col(RewardCodes::TenantId).eq(tenant_id.to_string()))
            .and_where(Expr::col(RewardCodes::Status).eq(RewardStatus::Active.as_str()))
            .and_where(Expr::col(RewardCodes::ExpiresAt).gt(format_timestamp(now)))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values).fetch_one(&mut *conn).await?;
        Ok(row.try_get(0)?)
    }

    /// Explain why a guarded transition matched no row.
    async fn transition_error(
        conn: &mut SqliteConnection,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> StorageError {
        match Self::select_reward(conn, id).await {
            Ok(None) => StorageError::RewardNotFound(id),
            Ok(Some(reward)) if reward.status != RewardStatus::Active => {
                StorageError::InvalidTransition {
                    id,
                    status: reward.status,
                }
            }
            Ok(Some(reward)) if now >= reward.expires_at => StorageError::PastExpiry {
                id,
                expires_at: reward.expires_at,
            },
            Ok(Some(reward)) => StorageError::InvalidTransition {
                id,
                status: reward.status,
            },
            Err(e) => e,
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        to: RewardStatus,
        now: DateTime<Utc>,
        attribution: Attribution,
    ) -> Result<(RewardCode, crate::model::AuditEntry)> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&transition_sql(to == RewardStatus::Redeemed))
            .bind(to.as_str())
            .bind(id.to_string())
            .bind(format_timestamp(now))
            .fetch_optional(&mut *tx)
            .await?;

        let reward = match row {
            Some(row) => reward_from_row(&row)?,
            None => return Err(Self::transition_error(&mut *tx, id, now).await),
        };

        let audit = insert_audit(
            &mut *tx,
            &NewAuditEntry {
                customer_id: reward.customer_id,
                tenant_id: reward.tenant_id,
                points_delta: 0,
                related_reward_code_id: Some(reward.id),
                attribution,
            },
            now,
        )
        .await?;

        tx.commit().await?;
        Ok((reward, audit))
    }
}

#[async_trait]
impl RewardStore for SqliteStore {
    async fn code_exists(&self, code: &str) -> Result<bool> {
        let (sql, values) = Query::select()
            .column(RewardCodes::Id)
            .from(RewardCodes::Table)
            .and_where(Expr::col(RewardCodes::Code).eq(code))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn count_active(
        &self,
        customer_id: Uuid,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        Self::count_live(&mut conn, customer_id, tenant_id, now).await
    }

    async fn issue(&self, request: IssueRequest) -> Result<IssuedReward> {
        let mut tx = self.pool.begin().await?;

        // Deduct first: this is the write that takes the lock, and it
        // re-validates the balance against the committed state.
        let row = sqlx::query(&deduct_sql())
            .bind(request.points_required)
            .bind(format_timestamp(request.now))
            .bind(request.customer_id.to_string())
            .bind(request.tenant_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;

        let entry = match row {
            Some(row) => ledger_from_row(&row)?,
            None => {
                let current =
                    Self::select_ledger(&mut *tx, request.customer_id, request.tenant_id).await?;
                return Err(match current {
                    Some(current) => StorageError::InsufficientPoints {
                        available: current.total_points,
                        required: request.points_required,
                    },
                    None => StorageError::LedgerNotFound {
                        customer_id: request.customer_id,
                        tenant_id: request.tenant_id,
                    },
                });
            }
        };

        let active =
            Self::count_live(&mut *tx, request.customer_id, request.tenant_id, request.now).await?;
        if active >= request.max_active_cards {
            return Err(StorageError::ActiveCardCap {
                active,
                cap: request.max_active_cards,
            });
        }

        let (sql, values) = Query::insert()
            .into_table(RewardCodes::Table)
            .columns(reward_columns())
            .values_panic([
                request.code_id.to_string().into(),
                request.code.clone().into(),
                request.customer_id.to_string().into(),
                request.tenant_id.to_string().into(),
                request.value.into(),
                request.points_required.into(),
                RewardStatus::Active.as_str().into(),
                format_timestamp(request.expires_at).into(),
                format_timestamp(request.now).into(),
                Option::<String>::None.into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        if let Err(e) = sqlx::query_with(&sql, values).execute(&mut *tx).await {
            let unique = e
                .as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false);
            return Err(if unique {
                StorageError::CodeCollision(request.code)
            } else {
                e.into()
            });
        }

        let audit = insert_audit(
            &mut *tx,
            &NewAuditEntry {
                customer_id: request.customer_id,
                tenant_id: request.tenant_id,
                points_delta: -request.points_required,
                related_reward_code_id: Some(request.code_id),
                attribution: Attribution::system(format!("Reward code {} issued", request.code)),
            },
            request.now,
        )
        .await?;

        tx.commit().await?;

        let reward = RewardCode {
            id: request.code_id,
            code: request.code,
            customer_id: request.customer_id,
            tenant_id: request.tenant_id,
            value: request.value,
            points_consumed: request.points_required,
            status: RewardStatus::Active,
            expires_at: request.expires_at,
            created_at: request.now,
            redeemed_at: None,
        };

        Ok(IssuedReward {
            reward,
            entry,
            audit_id: audit.id,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<RewardCode>> {
        let mut conn = self.pool.acquire().await?;
        Self::select_reward(&mut conn, id).await
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<RewardCode>> {
        let (sql, values) = Query::select()
            .columns(reward_columns())
            .from(RewardCodes::Table)
            .and_where(Expr::col(RewardCodes::Code).eq(code))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(reward_from_row).transpose()
    }

    async fn list_for(&self, customer_id: Uuid, tenant_id: Uuid) -> Result<Vec<RewardCode>> {
        let (sql, values) = Query::select()
            .columns(reward_columns())
            .from(RewardCodes::Table)
            .and_where(Expr::col(RewardCodes::CustomerId).eq(customer_id.to_string()))
            .and_where(Expr::col(RewardCodes::TenantId).eq(tenant_id.to_string()))
            .order_by(RewardCodes::CreatedAt, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(reward_from_row).collect()
    }

    async fn redeem(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        attribution: Attribution,
    ) -> Result<Redemption> {
        let (reward, audit) = self
            .transition(id, RewardStatus::Redeemed, now, attribution)
            .await?;
        Ok(Redemption { reward, audit })
    }

    async fn cancel(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        attribution: Attribution,
    ) -> Result<RewardCode> {
        let (reward, _) = self
            .transition(id, RewardStatus::Cancelled, now, attribution)
            .await?;
        Ok(reward)
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<RewardCode>> {
        let sql = format!(
            "UPDATE reward_codes SET status = 'expired' \
             WHERE status = 'active' AND expires_at <= ?1 \
             RETURNING {}",
            REWARD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(format_timestamp(now))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(reward_from_row).collect()
    }
}
