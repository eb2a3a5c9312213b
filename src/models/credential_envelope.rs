//! Credential envelope entity model
//!
//! One row per connection holding the authenticated-encryption envelope for
//! that connection's third-party secret. Only the envelope and a masked
//! preview persist; plaintext never does.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "credential_envelopes")]
pub struct Model {
    /// Unique identifier for the envelope row (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Connection this envelope belongs to (unique, one envelope each)
    pub connection_id: Uuid,

    /// The versioned envelope: {version, algorithm, iv, authTag, ciphertext}
    #[sea_orm(column_type = "JsonBinary")]
    pub envelope: JsonValue,

    /// Non-reversible preview of the secret for display (e.g. ****7f3a)
    pub masked_preview: String,

    /// When the stored credentials expire upstream, if known
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// Last wholesale envelope replacement
    pub rotated_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the envelope was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the envelope was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::connection::Entity",
        from = "Column::ConnectionId",
        to = "super::connection::Column::Id"
    )]
    Connection,
}

impl Related<super::connection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Connection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
