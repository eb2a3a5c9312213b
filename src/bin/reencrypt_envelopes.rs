use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use syncline::{
    config::ConfigLoader,
    crypto::{self, CredentialEnvelope, VaultKey},
    db,
    models::credential_envelope,
    repositories::CredentialEnvelopeRepository,
};

/// Master-key rotation: decrypt every stored envelope with the configured key
/// and re-encrypt it with the key in `SYNCLINE_NEW_CREDENTIAL_KEY`. Rows that
/// do not decrypt are skipped and listed so the operator can reconnect them.
#[tokio::main]
async fn main() -> Result<()> {
    let loader = ConfigLoader::new();
    let config = loader.load().context("loading configuration")?;

    let current_bytes = config
        .credential_key
        .clone()
        .context("credential key not present in configuration")?;
    let current_key = VaultKey::new(current_bytes).context("initializing current key")?;

    let new_key_encoded = std::env::var("SYNCLINE_NEW_CREDENTIAL_KEY")
        .context("SYNCLINE_NEW_CREDENTIAL_KEY not set")?;
    let new_key = VaultKey::from_base64(&new_key_encoded).context("initializing new key")?;

    let db = Arc::new(
        db::init_pool(&config)
            .await
            .context("initializing database connection pool")?,
    );

    let envelopes = CredentialEnvelopeRepository::new(db.clone())
        .list_all()
        .await
        .context("querying credential envelopes")?;

    let total = envelopes.len();
    let mut updated_count = 0usize;
    let mut failed: Vec<(uuid::Uuid, String)> = Vec::new();

    for row in envelopes {
        let connection_id = row.connection_id;
        // Must match the AAD the vault uses when sealing
        let aad = format!("connection|{}", connection_id);

        let envelope: CredentialEnvelope = match serde_json::from_value(row.envelope.clone()) {
            Ok(envelope) => envelope,
            Err(err) => {
                failed.push((connection_id, format!("malformed envelope: {}", err)));
                continue;
            }
        };

        let plaintext = match crypto::open(&current_key, aad.as_bytes(), &envelope) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                failed.push((connection_id, err.to_string()));
                continue;
            }
        };

        let resealed = crypto::seal(&new_key, aad.as_bytes(), &plaintext)
            .with_context(|| format!("re-encrypting envelope for {}", connection_id))?;
        let json = serde_json::to_value(&resealed)
            .with_context(|| format!("serializing envelope for {}", connection_id))?;

        let mut active: credential_envelope::ActiveModel = row.into();
        active.envelope = Set(json);
        active.updated_at = Set(Utc::now().into());
        active
            .update(&*db)
            .await
            .with_context(|| format!("updating envelope for {}", connection_id))?;
        updated_count += 1;
    }

    println!(
        "Re-encrypted {} of {} envelope(s) with the new key.",
        updated_count, total
    );
    if !failed.is_empty() {
        println!(
            "Skipped {} row(s) that could not be decrypted:",
            failed.len()
        );
        for (connection_id, reason) in &failed {
            println!("  {}: {}", connection_id, reason);
        }
    }

    Ok(())
}
