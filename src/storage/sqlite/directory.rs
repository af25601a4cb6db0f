//! SQLite Directory implementation: tenants, branches, customers, dedup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use uuid::Uuid;

use super::{branch_from_row, customer_from_row, tenant_from_row, SqliteStore};
use crate::model::{Branch, Customer, Tenant};
use crate::storage::helpers::{format_timestamp, name_key};
use crate::storage::schema::{Branches, Customers, ProcessedEvents, Tenants};
use crate::storage::{Directory, ProfileUpdate, Result, StorageError};

fn customer_columns() -> [Customers; 6] {
    [
        Customers::Id,
        Customers::Identity,
        Customers::DisplayName,
        Customers::Email,
        Customers::OptedOut,
        Customers::CreatedAt,
    ]
}

impl SqliteStore {
    async fn customer_where(&self, column: Customers, value: String) -> Result<Option<Customer>> {
        let (sql, values) = Query::select()
            .columns(customer_columns())
            .from(Customers::Table)
            .and_where(Expr::col(column).eq(value))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(customer_from_row).transpose()
    }
}

fn missing_customer(customer_id: Uuid) -> StorageError {
    StorageError::InvalidRecord(format!("customer {} does not exist", customer_id))
}

#[async_trait]
impl Directory for SqliteStore {
    async fn create_tenant(&self, name: &str) -> Result<Tenant> {
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
        };

        let (sql, values) = Query::insert()
            .into_table(Tenants::Table)
            .columns([Tenants::Id, Tenants::Name, Tenants::NameKey, Tenants::CreatedAt])
            .values_panic([
                tenant.id.to_string().into(),
                tenant.name.clone().into(),
                name_key(name).into(),
                format_timestamp(Utc::now()).into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(tenant)
    }

    async fn tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        let (sql, values) = Query::select()
            .columns([Tenants::Id, Tenants::Name])
            .from(Tenants::Table)
            .and_where(Expr::col(Tenants::Id).eq(id.to_string()))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn tenant_by_name(&self, name: &str) -> Result<Option<Tenant>> {
        let (sql, values) = Query::select()
            .columns([Tenants::Id, Tenants::Name])
            .from(Tenants::Table)
            .and_where(Expr::col(Tenants::NameKey).eq(name_key(name)))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn create_branch(&self, tenant_id: Uuid, name: &str) -> Result<Branch> {
        let branch = Branch {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.trim().to_string(),
        };

        let (sql, values) = Query::insert()
            .into_table(Branches::Table)
            .columns([
                Branches::Id,
                Branches::TenantId,
                Branches::Name,
                Branches::NameKey,
                Branches::CreatedAt,
            ])
            .values_panic([
                branch.id.to_string().into(),
                tenant_id.to_string().into(),
                branch.name.clone().into(),
                name_key(name).into(),
                format_timestamp(Utc::now()).into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(branch)
    }

    async fn branch_by_name(&self, tenant_id: Uuid, name: &str) -> Result<Option<Branch>> {
        let (sql, values) = Query::select()
            .columns([Branches::Id, Branches::TenantId, Branches::Name])
            .from(Branches::Table)
            .and_where(Expr::col(Branches::TenantId).eq(tenant_id.to_string()))
            .and_where(Expr::col(Branches::NameKey).eq(name_key(name)))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(branch_from_row).transpose()
    }

    async fn customer(&self, id: Uuid) -> Result<Option<Customer>> {
        self.customer_where(Customers::Id, id.to_string()).await
    }

    async fn customer_by_identity(&self, identity: &str) -> Result<Option<Customer>> {
        self.customer_where(Customers::Identity, identity.to_string())
            .await
    }

    async fn ensure_customer(&self, identity: &str) -> Result<Customer> {
        let (sql, values) = Query::insert()
            .into_table(Customers::Table)
            .columns([Customers::Id, Customers::Identity, Customers::CreatedAt])
            .values_panic([
                Uuid::new_v4().to_string().into(),
                identity.into(),
                format_timestamp(Utc::now()).into(),
            ])
            .on_conflict(
                OnConflict::column(Customers::Identity)
                    .do_nothing()
                    .to_owned(),
            )
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&sql, values).execute(&self.pool).await?;

        self.customer_by_identity(identity)
            .await?
            .ok_or_else(|| StorageError::InvalidRecord(format!("customer {} vanished", identity)))
    }

    async fn set_opted_out(&self, customer_id: Uuid, opted_out: bool) -> Result<()> {
        let (sql, values) = Query::update()
            .table(Customers::Table)
            .value(Customers::OptedOut, opted_out)
            .and_where(Expr::col(Customers::Id).eq(customer_id.to_string()))
            .build_sqlx(SqliteQueryBuilder);

        let affected = sqlx::query_with(&sql, values)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(missing_customer(customer_id));
        }
        Ok(())
    }

    async fn update_profile(&self, customer_id: Uuid, profile: &ProfileUpdate) -> Result<()> {
        if profile.is_empty() {
            return match self.customer(customer_id).await? {
                Some(_) => Ok(()),
                None => Err(missing_customer(customer_id)),
            };
        }

        let mut update = Query::update();
        update.table(Customers::Table);
        if let Some(name) = &profile.display_name {
            update.value(Customers::DisplayName, name.clone());
        }
        if let Some(email) = &profile.email {
            update.value(Customers::Email, email.clone());
        }
        let (sql, values) = update
            .and_where(Expr::col(Customers::Id).eq(customer_id.to_string()))
            .build_sqlx(SqliteQueryBuilder);

        let affected = sqlx::query_with(&sql, values)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(missing_customer(customer_id));
        }
        Ok(())
    }

    async fn record_inbound_event(
        &self,
        message_id: &str,
        received_at: DateTime<Utc>,
    ) -> Result<bool> {
        let (sql, values) = Query::insert()
            .into_table(ProcessedEvents::Table)
            .columns([ProcessedEvents::MessageId, ProcessedEvents::ReceivedAt])
            .values_panic([message_id.into(), format_timestamp(received_at).into()])
            .on_conflict(
                OnConflict::column(ProcessedEvents::MessageId)
                    .do_nothing()
                    .to_owned(),
            )
            .build_sqlx(SqliteQueryBuilder);

        let affected = sqlx::query_with(&sql, values)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected == 1)
    }

    async fn forget_inbound_event(&self, message_id: &str) -> Result<()> {
        let (sql, values) = Query::delete()
            .from_table(ProcessedEvents::Table)
            .and_where(Expr::col(ProcessedEvents::MessageId).eq(message_id))
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(())
    }

    async fn prune_inbound_events(&self, before: DateTime<Utc>) -> Result<u64> {
        let (sql, values) = Query::delete()
            .from_table(ProcessedEvents::Table)
            .and_where(Expr::col(ProcessedEvents::ReceivedAt).lt(format_timestamp(before)))
            .build_sqlx(SqliteQueryBuilder);

        Ok(sqlx::query_with(&sql, values)
            .execute(&self.pool)
            .await?
            .rows_affected())
    }
}
