//! Sync state entity model
//!
//! One row per connection: the resumable cursor/checkpoint for its sync
//! loop, plus the lease columns that enforce at-most-one-active-run.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_states")]
pub struct Model {
    /// Unique identifier for the sync state row (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Connection this state belongs to (unique, one state each)
    pub connection_id: Uuid,

    /// State machine status (idle|running|done|error)
    pub status: String,

    /// Opaque cursor for the next page; NULL means start from the beginning
    #[sea_orm(column_type = "JsonBinary")]
    pub next_page_cursor: Option<JsonValue>,

    /// Non-empty pages consumed in the current cycle
    pub pages_fetched: i32,

    /// Records applied in the current cycle
    pub records_synced: i32,

    /// Token of the run currently holding the lease, if any
    pub lease_owner_token: Option<Uuid>,

    /// Hard expiry of the lease; crash-recovery net
    pub lease_expires_at: Option<DateTimeWithTimeZone>,

    /// Rate-limit backoff hint; scheduler skips the connection until then
    pub retry_after: Option<DateTimeWithTimeZone>,

    /// When the current/most recent run started
    pub started_at: Option<DateTimeWithTimeZone>,

    /// When the most recent run reached a terminal state
    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Human-readable description of the last failure, if any
    pub last_error: Option<String>,

    /// Timestamp when the row was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the row was last updated
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

/// Status of a connection's sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Running,
    Done,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Running => "running",
            SyncStatus::Done => "done",
            SyncStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(SyncStatus::Idle),
            "running" => Some(SyncStatus::Running),
            "done" => Some(SyncStatus::Done),
            "error" => Some(SyncStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
