//! Mirrored record entity model
//!
//! Externally sourced entities (a video, a broker order) mirrored into local
//! storage per connection. `(connection_id, external_id)` is unique; syncing
//! the same external id again updates in place.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "mirrored_records")]
pub struct Model {
    /// Unique identifier for the record row (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Connection this record was mirrored through
    pub connection_id: Uuid,

    /// Upstream's immutable identifier for the record
    pub external_id: String,

    /// Provider record category (e.g. "video", "order")
    pub kind: String,

    /// Provider-specific payload as received upstream
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    /// Set when upstream reports the record removed (soft delete)
    pub deleted_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the record was first mirrored
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the record last changed locally
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
