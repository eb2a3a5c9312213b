//! Connection entity model
//!
//! This module contains the SeaORM entity model for the connections table,
//! which stores the durable link between a local owner and one external
//! third-party account.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Connection entity representing one linked external account for one owner
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connections")]
pub struct Model {
    /// Unique identifier for the connection (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owner identifier (user or organization); opaque to this service
    pub owner_id: Uuid,

    /// Key of the provider this connection is linked to (e.g. "vimeo")
    pub provider_key: String,

    /// Display name for the connection (optional)
    pub display_name: Option<String>,

    /// Status of the connection (connected|disconnected|error)
    pub status: String,

    /// Whether this is the default connection for (owner, provider)
    pub is_default: bool,

    /// Human-readable description of the last failure, if any
    pub last_error: Option<String>,

    /// Newest upstream record activity observed, feeds tier classification
    pub last_activity_at: Option<DateTimeWithTimeZone>,

    /// When the last sync cycle completed successfully
    pub last_synced_at: Option<DateTimeWithTimeZone>,

    /// Non-secret provider-specific configuration
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Option<JsonValue>,

    /// Timestamp when the connection was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the connection was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::mirrored_record::Entity")]
    MirroredRecords,
}

impl Related<super::mirrored_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MirroredRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Lifecycle status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "connected" => Some(ConnectionStatus::Connected),
            "disconnected" => Some(ConnectionStatus::Disconnected),
            "error" => Some(ConnectionStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
