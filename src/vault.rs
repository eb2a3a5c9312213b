//! Credential vault
//!
//! The vault owns every plaintext secret in the system. Secrets enter through
//! `store`/`rotate`, persist only as AES-256-GCM envelopes bound to their
//! connection id, and leave only through `reveal` into a `Zeroizing` buffer
//! for the duration of a single sync step. Everything else sees the masked
//! preview.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use sea_orm::prelude::DateTimeWithTimeZone;
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{self, CredentialEnvelope, CryptoError, VaultKey};
use crate::repositories::CredentialEnvelopeRepository;

/// Vault error types
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("no credentials stored for connection {0}")]
    NotFound(Uuid),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// Plaintext credentials revealed for one sync step
pub struct RevealedCredential {
    /// The secret, zeroized when the run's stack frame drops it
    pub secret: Zeroizing<String>,
    /// Expiry communicated when the secret was stored
    pub expires_at: Option<DateTime<Utc>>,
}

// Manual impl: the plaintext secret must never reach Debug output.
impl std::fmt::Debug for RevealedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevealedCredential")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Non-secret view of stored credentials
#[derive(Debug, Clone)]
pub struct CredentialPreview {
    /// Masked preview, e.g. `****7f3a`
    pub masked: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub rotated_at: Option<DateTime<Utc>>,
}

/// Encrypted credential storage per connection
#[async_trait]
pub trait Vault: Send + Sync {
    /// Seals and persists a secret for a connection, replacing any prior
    /// envelope.
    async fn store(
        &self,
        connection_id: Uuid,
        secret: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), VaultError>;

    /// Opens the stored envelope and returns the plaintext with its expiry.
    async fn reveal(&self, connection_id: Uuid) -> Result<RevealedCredential, VaultError>;

    /// Replaces the stored envelope with a freshly sealed secret. Fails when
    /// no envelope exists; the old ciphertext is unrecoverable afterwards.
    async fn rotate(
        &self,
        connection_id: Uuid,
        secret: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), VaultError>;

    /// Removes the stored envelope. Removing an absent envelope is a no-op.
    async fn discard(&self, connection_id: Uuid) -> Result<(), VaultError>;

    /// Returns the non-secret preview of the stored credentials.
    async fn preview(&self, connection_id: Uuid) -> Result<Option<CredentialPreview>, VaultError>;
}

/// Database-backed vault over the credential envelope repository
pub struct DbVault {
    repo: CredentialEnvelopeRepository,
    key: VaultKey,
}

impl DbVault {
    pub fn new(repo: CredentialEnvelopeRepository, key: VaultKey) -> Self {
        Self { repo, key }
    }

    /// AAD binding an envelope to the connection that owns it
    fn aad_for(connection_id: Uuid) -> Vec<u8> {
        format!("connection|{}", connection_id).into_bytes()
    }

    fn seal_secret(
        &self,
        connection_id: Uuid,
        secret: &str,
    ) -> Result<(serde_json::Value, String), VaultError> {
        let envelope = crypto::seal(
            &self.key,
            &Self::aad_for(connection_id),
            secret.as_bytes(),
        )?;
        let json = serde_json::to_value(&envelope)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
        Ok((json, crypto::mask_preview(secret)))
    }
}

#[async_trait]
impl Vault for DbVault {
    async fn store(
        &self,
        connection_id: Uuid,
        secret: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), VaultError> {
        let (json, masked) = self.seal_secret(connection_id, secret)?;
        let expires_fixed: Option<DateTimeWithTimeZone> = expires_at.map(Into::into);

        if self.repo.get_by_connection(connection_id).await?.is_some() {
            self.repo
                .replace(connection_id, json, masked, expires_fixed)
                .await?;
        } else {
            self.repo
                .insert(connection_id, json, masked, expires_fixed)
                .await?;
        }

        tracing::info!(connection_id = %connection_id, "Credential envelope stored");
        Ok(())
    }

    async fn reveal(&self, connection_id: Uuid) -> Result<RevealedCredential, VaultError> {
        let row = self
            .repo
            .get_by_connection(connection_id)
            .await?
            .ok_or(VaultError::NotFound(connection_id))?;

        let envelope: CredentialEnvelope = serde_json::from_value(row.envelope)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;

        let plaintext = crypto::open(&self.key, &Self::aad_for(connection_id), &envelope)?;
        let secret = String::from_utf8(plaintext.to_vec()).map_err(|_| {
            CryptoError::MalformedEnvelope("plaintext is not valid UTF-8".to_string())
        })?;

        Ok(RevealedCredential {
            secret: Zeroizing::new(secret),
            expires_at: row.expires_at.map(|t| t.with_timezone(&Utc)),
        })
    }

    async fn rotate(
        &self,
        connection_id: Uuid,
        secret: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), VaultError> {
        let (json, masked) = self.seal_secret(connection_id, secret)?;
        let expires_fixed: Option<DateTimeWithTimeZone> = expires_at.map(Into::into);

        let rows = self
            .repo
            .replace(connection_id, json, masked, expires_fixed)
            .await?;
        if rows == 0 {
            return Err(VaultError::NotFound(connection_id));
        }

        tracing::info!(connection_id = %connection_id, "Credential envelope rotated");
        Ok(())
    }

    async fn discard(&self, connection_id: Uuid) -> Result<(), VaultError> {
        self.repo.delete_by_connection(connection_id).await?;
        Ok(())
    }

    async fn preview(&self, connection_id: Uuid) -> Result<Option<CredentialPreview>, VaultError> {
        let row = self.repo.get_by_connection(connection_id).await?;

        Ok(row.map(|row| CredentialPreview {
            masked: row.masked_preview,
            expires_at: row.expires_at.map(|t| t.with_timezone(&Utc)),
            rotated_at: row.rotated_at.map(|t| t.with_timezone(&Utc)),
        }))
    }
}
