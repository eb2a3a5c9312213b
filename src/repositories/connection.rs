//! Connection repository for database operations
//!
//! This module provides the ConnectionRepository struct which encapsulates
//! SeaORM operations for the connections table, including the keyset-paginated
//! owner listing and the partial-update paths used by the registry.

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::connection::{self, ConnectionStatus, Entity as Connection};

/// Repository for connection database operations
#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    db: Arc<DatabaseConnection>,
}

impl ConnectionRepository {
    /// Creates a new ConnectionRepository instance
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts a new connection record and returns the persisted row
    pub async fn create(
        &self,
        connection: connection::ActiveModel,
    ) -> Result<connection::Model, DbErr> {
        let id = connection
            .id
            .clone()
            .take()
            .ok_or_else(|| DbErr::Custom("connection id must be set".to_string()))?;

        connection.insert(&*self.db).await?;

        // For SQLite, query the record directly since we already know the ID
        Connection::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| DbErr::Custom("connection not persisted".to_string()))
    }

    /// Retrieves a connection by its ID
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<connection::Model>, DbErr> {
        Connection::find_by_id(id).one(&*self.db).await
    }

    /// Finds the default connection for an `(owner, provider)` pair
    pub async fn find_default_for_owner(
        &self,
        owner_id: Uuid,
        provider_key: &str,
    ) -> Result<Option<connection::Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::OwnerId.eq(owner_id))
            .filter(connection::Column::ProviderKey.eq(provider_key))
            .filter(connection::Column::IsDefault.eq(true))
            .order_by_asc(connection::Column::CreatedAt)
            .order_by_asc(connection::Column::Id)
            .one(&*self.db)
            .await
    }

    /// Lists all connections for an `(owner, provider)` pair ordered by creation time then ID
    pub async fn find_by_owner_and_provider(
        &self,
        owner_id: Uuid,
        provider_key: &str,
    ) -> Result<Vec<connection::Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::OwnerId.eq(owner_id))
            .filter(connection::Column::ProviderKey.eq(provider_key))
            .order_by_asc(connection::Column::CreatedAt)
            .order_by_asc(connection::Column::Id)
            .all(&*self.db)
            .await
    }

    /// Lists connections for an owner with keyset pagination.
    ///
    /// `after` carries the `(created_at, id)` keys of the last row from the
    /// previous page; the returned second element holds the keys to continue
    /// from, or `None` when the listing is exhausted.
    pub async fn list_for_owner(
        &self,
        owner_id: Uuid,
        limit: u64,
        after: Option<(DateTimeWithTimeZone, Uuid)>,
    ) -> Result<(Vec<connection::Model>, Option<(DateTimeWithTimeZone, Uuid)>), DbErr> {
        if limit == 0 {
            return Ok((Vec::new(), after));
        }

        let mut query = Connection::find()
            .filter(connection::Column::OwnerId.eq(owner_id))
            .order_by_asc(connection::Column::CreatedAt)
            .order_by_asc(connection::Column::Id);

        if let Some((created_at, id)) = after {
            let condition = Condition::any()
                .add(connection::Column::CreatedAt.gt(created_at))
                .add(
                    Condition::all()
                        .add(connection::Column::CreatedAt.eq(created_at))
                        .add(connection::Column::Id.gt(id)),
                );
            query = query.filter(condition);
        }

        let mut rows = query.limit(limit + 1).all(&*self.db).await?;

        let next = if rows.len() as u64 > limit {
            rows.pop();
            rows.last().map(|last| (last.created_at, last.id))
        } else {
            None
        };

        Ok((rows, next))
    }

    /// Lists every connection currently in `connected` status (scheduler candidates)
    pub async fn list_connected(&self) -> Result<Vec<connection::Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::Status.eq(ConnectionStatus::Connected.as_str()))
            .order_by_asc(connection::Column::CreatedAt)
            .order_by_asc(connection::Column::Id)
            .all(&*self.db)
            .await
    }

    /// Updates mutable fields on a connection; only `Set` fields are applied
    pub async fn update_by_id(
        &self,
        id: Uuid,
        update: connection::ActiveModel,
    ) -> Result<connection::Model, DbErr> {
        let existing = Connection::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("connection '{}' not found", id)))?;

        let mut model: connection::ActiveModel = existing.into();

        if let Some(display_name) = update.display_name.clone().take() {
            model.display_name = Set(display_name);
        }
        if let Some(status) = update.status.clone().take() {
            model.status = Set(status);
        }
        if let Some(is_default) = update.is_default.clone().take() {
            model.is_default = Set(is_default);
        }
        if let Some(last_error) = update.last_error.clone().take() {
            model.last_error = Set(last_error);
        }
        if let Some(metadata) = update.metadata.clone().take() {
            model.metadata = Set(metadata);
        }
        model.updated_at = Set(Utc::now().fixed_offset());

        model.update(&*self.db).await
    }

    /// Sets the connection status and last error in one statement
    pub async fn set_status(
        &self,
        id: Uuid,
        status: ConnectionStatus,
        last_error: Option<&str>,
    ) -> Result<u64, DbErr> {
        let result = Connection::update_many()
            .col_expr(connection::Column::Status, Expr::value(status.as_str()))
            .col_expr(
                connection::Column::LastError,
                Expr::value(last_error.map(str::to_string)),
            )
            .col_expr(
                connection::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(connection::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Records sync completion bookkeeping used by the next scheduling decision
    pub async fn note_synced(
        &self,
        id: Uuid,
        synced_at: DateTime<Utc>,
        activity_at: Option<DateTime<Utc>>,
    ) -> Result<u64, DbErr> {
        let synced_fixed: DateTimeWithTimeZone = synced_at.into();
        let mut update = Connection::update_many()
            .col_expr(
                connection::Column::LastSyncedAt,
                Expr::value(Some(synced_fixed)),
            )
            .col_expr(
                connection::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            );

        if let Some(activity) = activity_at {
            let activity_fixed: DateTimeWithTimeZone = activity.into();
            update = update.col_expr(
                connection::Column::LastActivityAt,
                Expr::value(Some(activity_fixed)),
            );
        }

        let result = update
            .filter(connection::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Stamps upstream activity observed outside a full sync (webhook events)
    pub async fn mark_activity(&self, id: Uuid, at: DateTime<Utc>) -> Result<u64, DbErr> {
        let fixed: DateTimeWithTimeZone = at.into();
        let result = Connection::update_many()
            .col_expr(connection::Column::LastActivityAt, Expr::value(Some(fixed)))
            .col_expr(
                connection::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(connection::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
