//! SQLite SettingsStore implementation.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::Row;
use uuid::Uuid;

use super::SqliteStore;
use crate::rewards::RewardSettings;
use crate::storage::helpers::format_timestamp;
use crate::storage::schema::RewardSettingsTable;
use crate::storage::{Result, SettingsStore};

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<RewardSettings>> {
        let (sql, values) = Query::select()
            .columns([
                RewardSettingsTable::PointsRequired,
                RewardSettingsTable::CardValue,
                RewardSettingsTable::ExpirationDays,
                RewardSettingsTable::MaxActiveCards,
                RewardSettingsTable::CheckinPoints,
            ])
            .from(RewardSettingsTable::Table)
            .and_where(Expr::col(RewardSettingsTable::TenantId).eq(tenant_id.to_string()))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(RewardSettings {
                points_required: row.try_get("points_required")?,
                card_value: row.try_get("card_value")?,
                expiration_days: row.try_get("expiration_days")?,
                max_active_cards: row.try_get("max_active_cards")?,
                checkin_points: row.try_get("checkin_points")?,
            })),
            None => Ok(None),
        }
    }

    async fn put(&self, tenant_id: Uuid, settings: &RewardSettings) -> Result<()> {
        let (sql, values) = Query::insert()
            .into_table(RewardSettingsTable::Table)
            .columns([
                RewardSettingsTable::TenantId,
                RewardSettingsTable::PointsRequired,
                RewardSettingsTable::CardValue,
                RewardSettingsTable::ExpirationDays,
                RewardSettingsTable::MaxActiveCards,
                RewardSettingsTable::CheckinPoints,
                RewardSettingsTable::UpdatedAt,
            ])
            .values_panic([
                tenant_id.to_string().into(),
                settings.points_required.into(),
                settings.card_value.into(),
                settings.expiration_days.into(),
                settings.max_active_cards.into(),
                settings.checkin_points.into(),
                format_timestamp(Utc::now()).into(),
            ])
            .on_conflict(
                OnConflict::column(RewardSettingsTable::TenantId)
                    .update_columns([
                        RewardSettingsTable::PointsRequired,
                        RewardSettingsTable::CardValue,
                        RewardSettingsTable::ExpirationDays,
                        RewardSettingsTable::MaxActiveCards,
                        RewardSettingsTable::CheckinPoints,
                        RewardSettingsTable::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(())
    }
}
