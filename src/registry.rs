//! Connection registry service
//!
//! Owns the lifecycle of connections: linking an owner to a provider,
//! idempotent reconnects, metadata updates, credential rotation, and
//! full removal of a connection together with its mirrored data. Secrets
//! pass straight through to the vault and are never persisted here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    TransactionTrait,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::connection::{self, ConnectionStatus};
use crate::models::{credential_envelope, mirrored_record, sync_state};
use crate::providers::ProviderRegistry;
use crate::repositories::ConnectionRepository;
use crate::vault::{Vault, VaultError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("connection {0} not found")]
    NotFound(Uuid),
    #[error("provider '{0}' is not registered")]
    UnknownProvider(String),
    #[error("a default connection already exists for this owner and provider")]
    DuplicateDefault,
    #[error("status '{0}' cannot be set directly")]
    InvalidStatus(String),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// Input for linking or re-linking a provider account
#[derive(Clone)]
pub struct UpsertConnection {
    pub owner_id: Uuid,
    pub provider_key: String,
    pub secret: String,
    pub display_name: Option<String>,
    pub metadata: Option<JsonValue>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Caller-editable connection fields
#[derive(Debug, Clone, Default)]
pub struct ConnectionChanges {
    pub display_name: Option<String>,
    pub status: Option<String>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub connection: connection::Model,
    /// False when an existing default connection was re-linked instead
    pub created: bool,
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// Links an owner to a provider. Re-linking the same provider updates
    /// the existing default connection in place (fresh credentials, status
    /// back to connected) instead of creating a duplicate; providers that
    /// allow multiple accounts get an additional non-default connection.
    async fn upsert_for_owner(&self, input: UpsertConnection)
    -> Result<UpsertOutcome, RegistryError>;

    async fn get(&self, id: Uuid) -> Result<connection::Model, RegistryError>;

    /// Pages through an owner's connections in creation order.
    async fn list_for_owner(
        &self,
        owner_id: Uuid,
        limit: u64,
        after: Option<(DateTimeWithTimeZone, Uuid)>,
    ) -> Result<
        (
            Vec<connection::Model>,
            Option<(DateTimeWithTimeZone, Uuid)>,
        ),
        RegistryError,
    >;

    /// Applies caller-editable changes. Status may only move between
    /// connected and disconnected; the error status is owned by sync runs.
    async fn update(
        &self,
        id: Uuid,
        changes: ConnectionChanges,
    ) -> Result<connection::Model, RegistryError>;

    /// Replaces the stored secret and marks the connection healthy again.
    async fn rotate_credentials(
        &self,
        id: Uuid,
        secret: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<connection::Model, RegistryError>;

    /// Removes the connection and everything derived from it (credentials,
    /// sync state, mirrored records) in one transaction.
    async fn delete(&self, id: Uuid) -> Result<(), RegistryError>;
}

fn validate_status_change(raw: &str) -> Result<ConnectionStatus, RegistryError> {
    match ConnectionStatus::parse(raw) {
        Some(ConnectionStatus::Connected) => Ok(ConnectionStatus::Connected),
        Some(ConnectionStatus::Disconnected) => Ok(ConnectionStatus::Disconnected),
        _ => Err(RegistryError::InvalidStatus(raw.to_string())),
    }
}

pub struct DbRegistry {
    db: Arc<DatabaseConnection>,
    connections: ConnectionRepository,
    vault: Arc<dyn Vault>,
    providers: Arc<ProviderRegistry>,
}

impl DbRegistry {
    pub fn new(
        db: Arc<DatabaseConnection>,
        vault: Arc<dyn Vault>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            connections: ConnectionRepository::new(db.clone()),
            db,
            vault,
            providers,
        }
    }

    /// Inserts the connection row, then stores its credentials. A vault
    /// failure rolls the row back so no connection exists without an
    /// envelope.
    async fn create_connection(
        &self,
        input: &UpsertConnection,
        is_default: bool,
    ) -> Result<connection::Model, RegistryError> {
        let now = Utc::now().fixed_offset();
        let model = connection::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_id: Set(input.owner_id),
            provider_key: Set(input.provider_key.clone()),
            display_name: Set(input.display_name.clone()),
            status: Set(ConnectionStatus::Connected.as_str().to_string()),
            is_default: Set(is_default),
            last_error: Set(None),
            last_activity_at: Set(None),
            last_synced_at: Set(None),
            metadata: Set(input.metadata.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = match self.connections.create(model).await {
            Ok(created) => created,
            // The default guard index catches concurrent first links
            Err(err) if is_unique_violation(&err) => return Err(RegistryError::DuplicateDefault),
            Err(err) => return Err(err.into()),
        };

        if let Err(err) = self
            .vault
            .store(created.id, &input.secret, input.expires_at)
            .await
        {
            if let Err(cleanup) = connection::Entity::delete_by_id(created.id)
                .exec(&*self.db)
                .await
            {
                tracing::error!(
                    connection_id = %created.id,
                    "failed to remove connection after credential store failure: {}",
                    cleanup
                );
            }
            return Err(err.into());
        }

        tracing::info!(
            connection_id = %created.id,
            provider = %input.provider_key,
            "connection created"
        );
        Ok(created)
    }
}

#[async_trait]
impl Registry for DbRegistry {
    async fn upsert_for_owner(
        &self,
        input: UpsertConnection,
    ) -> Result<UpsertOutcome, RegistryError> {
        let descriptor = self
            .providers
            .get(&input.provider_key)
            .map(|client| client.descriptor())
            .ok_or_else(|| RegistryError::UnknownProvider(input.provider_key.clone()))?;

        let existing_default = self
            .connections
            .find_default_for_owner(input.owner_id, &input.provider_key)
            .await?;

        if !descriptor.allows_multiple {
            if let Some(existing) = existing_default {
                self.vault
                    .store(existing.id, &input.secret, input.expires_at)
                    .await?;

                let mut update = connection::ActiveModel::default();
                update.status = Set(ConnectionStatus::Connected.as_str().to_string());
                update.last_error = Set(None);
                if let Some(name) = &input.display_name {
                    update.display_name = Set(Some(name.clone()));
                }
                if let Some(metadata) = &input.metadata {
                    update.metadata = Set(Some(metadata.clone()));
                }
                let updated = self.connections.update_by_id(existing.id, update).await?;

                tracing::info!(
                    connection_id = %existing.id,
                    provider = %input.provider_key,
                    "existing connection re-linked"
                );
                return Ok(UpsertOutcome {
                    connection: updated,
                    created: false,
                });
            }
        }

        let is_default = existing_default.is_none();
        let created = self.create_connection(&input, is_default).await?;
        Ok(UpsertOutcome {
            connection: created,
            created: true,
        })
    }

    async fn get(&self, id: Uuid) -> Result<connection::Model, RegistryError> {
        self.connections
            .get_by_id(id)
            .await?
            .ok_or(RegistryError::NotFound(id))
    }

    async fn list_for_owner(
        &self,
        owner_id: Uuid,
        limit: u64,
        after: Option<(DateTimeWithTimeZone, Uuid)>,
    ) -> Result<
        (
            Vec<connection::Model>,
            Option<(DateTimeWithTimeZone, Uuid)>,
        ),
        RegistryError,
    > {
        Ok(self.connections.list_for_owner(owner_id, limit, after).await?)
    }

    async fn update(
        &self,
        id: Uuid,
        changes: ConnectionChanges,
    ) -> Result<connection::Model, RegistryError> {
        let mut update = connection::ActiveModel::default();
        if let Some(name) = changes.display_name {
            update.display_name = Set(Some(name));
        }
        if let Some(metadata) = changes.metadata {
            update.metadata = Set(Some(metadata));
        }
        if let Some(raw) = changes.status {
            let status = validate_status_change(&raw)?;
            update.status = Set(status.as_str().to_string());
            if matches!(status, ConnectionStatus::Connected) {
                update.last_error = Set(None);
            }
        }

        match self.connections.update_by_id(id, update).await {
            Ok(model) => Ok(model),
            Err(DbErr::RecordNotFound(_)) => Err(RegistryError::NotFound(id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn rotate_credentials(
        &self,
        id: Uuid,
        secret: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<connection::Model, RegistryError> {
        let existing = self
            .connections
            .get_by_id(id)
            .await?
            .ok_or(RegistryError::NotFound(id))?;

        self.vault.rotate(existing.id, secret, expires_at).await?;

        let mut update = connection::ActiveModel::default();
        update.status = Set(ConnectionStatus::Connected.as_str().to_string());
        update.last_error = Set(None);
        let updated = self.connections.update_by_id(existing.id, update).await?;

        tracing::info!(connection_id = %id, "credentials rotated");
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RegistryError> {
        let txn = self.db.begin().await.map_err(RegistryError::Database)?;

        mirrored_record::Entity::delete_many()
            .filter(mirrored_record::Column::ConnectionId.eq(id))
            .exec(&txn)
            .await
            .map_err(RegistryError::Database)?;

        sync_state::Entity::delete_many()
            .filter(sync_state::Column::ConnectionId.eq(id))
            .exec(&txn)
            .await
            .map_err(RegistryError::Database)?;

        credential_envelope::Entity::delete_many()
            .filter(credential_envelope::Column::ConnectionId.eq(id))
            .exec(&txn)
            .await
            .map_err(RegistryError::Database)?;

        let deleted = connection::Entity::delete_by_id(id)
            .exec(&txn)
            .await
            .map_err(RegistryError::Database)?;
        if deleted.rows_affected == 0 {
            // Dropping the transaction rolls everything back
            return Err(RegistryError::NotFound(id));
        }

        txn.commit().await.map_err(RegistryError::Database)?;
        tracing::info!(connection_id = %id, "connection and mirrored data deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_change_validation() {
        assert!(matches!(
            validate_status_change("connected"),
            Ok(ConnectionStatus::Connected)
        ));
        assert!(matches!(
            validate_status_change("disconnected"),
            Ok(ConnectionStatus::Disconnected)
        ));
        assert!(matches!(
            validate_status_change("error"),
            Err(RegistryError::InvalidStatus(_))
        ));
        assert!(matches!(
            validate_status_change("bogus"),
            Err(RegistryError::InvalidStatus(_))
        ));
    }
}
