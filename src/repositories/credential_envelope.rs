//! Credential envelope repository
//!
//! Persistence for the encrypted credential envelopes owned by the vault.
//! Exactly one envelope row exists per connection; rotation replaces the
//! envelope in a single UPDATE so the old ciphertext is never recoverable.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::credential_envelope::{self, Entity as CredentialEnvelope};

/// Repository for credential envelope database operations
#[derive(Debug, Clone)]
pub struct CredentialEnvelopeRepository {
    db: Arc<DatabaseConnection>,
}

impl CredentialEnvelopeRepository {
    /// Creates a new CredentialEnvelopeRepository instance
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Fetches the envelope row for a connection
    pub async fn get_by_connection(
        &self,
        connection_id: Uuid,
    ) -> Result<Option<credential_envelope::Model>, DbErr> {
        CredentialEnvelope::find()
            .filter(credential_envelope::Column::ConnectionId.eq(connection_id))
            .one(&*self.db)
            .await
    }

    /// Inserts the first envelope for a connection
    pub async fn insert(
        &self,
        connection_id: Uuid,
        envelope: JsonValue,
        masked_preview: String,
        expires_at: Option<DateTimeWithTimeZone>,
    ) -> Result<credential_envelope::Model, DbErr> {
        let id = Uuid::new_v4();
        let now = Utc::now().fixed_offset();

        let active = credential_envelope::ActiveModel {
            id: Set(id),
            connection_id: Set(connection_id),
            envelope: Set(envelope),
            masked_preview: Set(masked_preview),
            expires_at: Set(expires_at),
            rotated_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        active.insert(&*self.db).await?;

        CredentialEnvelope::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| DbErr::Custom("credential envelope not persisted".to_string()))
    }

    /// Replaces the stored envelope wholesale and stamps `rotated_at`.
    ///
    /// Returns the number of rows affected; zero means no envelope exists
    /// for the connection.
    pub async fn replace(
        &self,
        connection_id: Uuid,
        envelope: JsonValue,
        masked_preview: String,
        expires_at: Option<DateTimeWithTimeZone>,
    ) -> Result<u64, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = CredentialEnvelope::update_many()
            .col_expr(credential_envelope::Column::Envelope, Expr::value(envelope))
            .col_expr(
                credential_envelope::Column::MaskedPreview,
                Expr::value(masked_preview),
            )
            .col_expr(
                credential_envelope::Column::ExpiresAt,
                Expr::value(expires_at),
            )
            .col_expr(
                credential_envelope::Column::RotatedAt,
                Expr::value(Some(now)),
            )
            .col_expr(credential_envelope::Column::UpdatedAt, Expr::value(now))
            .filter(credential_envelope::Column::ConnectionId.eq(connection_id))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Deletes the envelope for a connection
    pub async fn delete_by_connection(&self, connection_id: Uuid) -> Result<u64, DbErr> {
        let result = CredentialEnvelope::delete_many()
            .filter(credential_envelope::Column::ConnectionId.eq(connection_id))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Lists every envelope row, oldest first (master-key rotation sweeps)
    pub async fn list_all(&self) -> Result<Vec<credential_envelope::Model>, DbErr> {
        CredentialEnvelope::find()
            .order_by_asc(credential_envelope::Column::CreatedAt)
            .order_by_asc(credential_envelope::Column::Id)
            .all(&*self.db)
            .await
    }
}
