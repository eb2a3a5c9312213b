//! # Data Models
//!
//! SeaORM entities for the tables Syncline owns, plus the small response
//! types that are not backed by a table.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod connection;
pub mod credential_envelope;
pub mod mirrored_record;
pub mod sync_state;

pub use connection::Entity as Connection;
pub use credential_envelope::Entity as CredentialEnvelope;
pub use mirrored_record::Entity as MirroredRecord;
pub use sync_state::Entity as SyncState;

/// Identity payload served at the API root.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// Service name
    pub service: String,
    /// Crate version baked in at build time
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
