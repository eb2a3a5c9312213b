//! Shared fixtures for integration tests.
//!
//! Builds in-memory SQLite databases with migrations applied plus the
//! service wiring (vault, provider registry, connection registry) the
//! suites exercise.

use std::sync::Arc;

use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use syncline::config::{AppConfig, ProvidersConfig};
use syncline::crypto::VaultKey;
use syncline::models::connection;
use syncline::providers::ProviderRegistry;
use syncline::registry::{DbRegistry, Registry, UpsertConnection};
use syncline::repositories::CredentialEnvelopeRepository;
use syncline::vault::{DbVault, Vault};
use uuid::Uuid;

/// Master key used by every suite; any 32 bytes will do.
pub const TEST_KEY: [u8; 32] = [7u8; 32];

/// Sets up an in-memory SQLite database with all migrations applied.
#[allow(dead_code)]
pub async fn setup_test_db() -> Result<Arc<DatabaseConnection>> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;

    // SQLite enforces the connection foreign keys by default; relax it so
    // component suites can plant fixture rows for synthetic connection ids.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(Arc::new(db))
}

/// Configuration with the required secrets filled in and defaults elsewhere.
#[allow(dead_code)]
pub fn test_config() -> AppConfig {
    AppConfig {
        operator_token: Some("test-operator-token".to_string()),
        credential_key: Some(TEST_KEY.to_vec()),
        ..AppConfig::default()
    }
}

pub fn build_vault(db: &Arc<DatabaseConnection>) -> Arc<dyn Vault> {
    let key = VaultKey::new(TEST_KEY.to_vec()).expect("test key is 32 bytes");
    Arc::new(DbVault::new(
        CredentialEnvelopeRepository::new(db.clone()),
        key,
    ))
}

/// Provider registry with injectable base URLs; Vimeo is always present,
/// the broker only when its base URL is given.
#[allow(dead_code)]
pub fn provider_registry(
    vimeo_base_url: Option<String>,
    broker_base_url: Option<String>,
) -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::from_config(&ProvidersConfig {
        vimeo_base_url,
        broker_base_url,
    }))
}

#[allow(dead_code)]
pub fn build_registry(
    db: &Arc<DatabaseConnection>,
    vault: Arc<dyn Vault>,
    providers: Arc<ProviderRegistry>,
) -> Arc<dyn Registry> {
    Arc::new(DbRegistry::new(db.clone(), vault, providers))
}

/// Links a fresh owner to the provider and returns the new connection.
#[allow(dead_code)]
pub async fn connect_account(
    registry: &dyn Registry,
    provider_key: &str,
    secret: &str,
) -> Result<connection::Model> {
    let outcome = registry
        .upsert_for_owner(UpsertConnection {
            owner_id: Uuid::new_v4(),
            provider_key: provider_key.to_string(),
            secret: secret.to_string(),
            display_name: None,
            metadata: None,
            expires_at: None,
        })
        .await?;
    Ok(outcome.connection)
}
