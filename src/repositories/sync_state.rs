//! Sync state repository
//!
//! Persistence for the per-connection sync checkpoint row. Lease acquisition
//! is a compare-and-swap: a conditional UPDATE that only matches when the
//! current lease is absent or expired and the status still matches the
//! snapshot the scheduler saw. Every write performed while a run is in flight
//! is fenced on `lease_owner_token`; zero rows affected means the lease was
//! lost and the caller must abort.

use chrono::{Duration, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::sync_state::{self, Entity as SyncState, SyncStatus};

/// Repository for sync state database operations
#[derive(Debug, Clone)]
pub struct SyncStateRepository {
    db: Arc<DatabaseConnection>,
}

impl SyncStateRepository {
    /// Creates a new SyncStateRepository instance
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Fetches the sync state row for a connection
    pub async fn get_by_connection(
        &self,
        connection_id: Uuid,
    ) -> Result<Option<sync_state::Model>, DbErr> {
        SyncState::find()
            .filter(sync_state::Column::ConnectionId.eq(connection_id))
            .one(&*self.db)
            .await
    }

    /// Fetches sync states for a batch of connections
    pub async fn find_by_connection_ids(
        &self,
        connection_ids: &[Uuid],
    ) -> Result<Vec<sync_state::Model>, DbErr> {
        if connection_ids.is_empty() {
            return Ok(Vec::new());
        }
        SyncState::find()
            .filter(sync_state::Column::ConnectionId.is_in(connection_ids.iter().copied()))
            .all(&*self.db)
            .await
    }

    /// Fetches the sync state for a connection, creating the idle row on
    /// first use. Concurrent callers race on the unique index; the loser's
    /// insert is a no-op and both read the same row.
    pub async fn get_or_create(&self, connection_id: Uuid) -> Result<sync_state::Model, DbErr> {
        if let Some(existing) = self.get_by_connection(connection_id).await? {
            return Ok(existing);
        }

        let now = Utc::now().fixed_offset();
        let active = sync_state::ActiveModel {
            id: Set(Uuid::new_v4()),
            connection_id: Set(connection_id),
            status: Set(SyncStatus::Idle.as_str().to_string()),
            next_page_cursor: Set(None),
            pages_fetched: Set(0),
            records_synced: Set(0),
            lease_owner_token: Set(None),
            lease_expires_at: Set(None),
            retry_after: Set(None),
            started_at: Set(None),
            finished_at: Set(None),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let insert = SyncState::insert(active)
            .on_conflict(
                OnConflict::column(sync_state::Column::ConnectionId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&*self.db)
            .await;
        match insert {
            Ok(_) | Err(DbErr::RecordNotInserted) => {}
            Err(e) => return Err(e),
        }

        self.get_by_connection(connection_id)
            .await?
            .ok_or_else(|| DbErr::Custom("sync state not persisted".to_string()))
    }

    /// Attempts to acquire the run lease via compare-and-swap.
    ///
    /// Matches only when the lease is absent or expired and the status still
    /// equals `prior_status`. A prior `idle`/`done` status begins a fresh
    /// cycle (cursor to start, counters zeroed); `running`/`error` resume the
    /// persisted checkpoint. Returns false when another runner won the race.
    pub async fn acquire_lease(
        &self,
        connection_id: Uuid,
        token: Uuid,
        prior_status: SyncStatus,
        lease_seconds: u64,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let expires = now + Duration::seconds(lease_seconds as i64);
        let fresh_cycle = matches!(prior_status, SyncStatus::Idle | SyncStatus::Done);

        let mut update = SyncState::update_many()
            .col_expr(
                sync_state::Column::LeaseOwnerToken,
                Expr::value(Some(token)),
            )
            .col_expr(
                sync_state::Column::LeaseExpiresAt,
                Expr::value(Some(expires)),
            )
            .col_expr(
                sync_state::Column::Status,
                Expr::value(SyncStatus::Running.as_str()),
            )
            .col_expr(sync_state::Column::StartedAt, Expr::value(Some(now)))
            .col_expr(
                sync_state::Column::RetryAfter,
                Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(sync_state::Column::UpdatedAt, Expr::value(now));

        if fresh_cycle {
            update = update
                .col_expr(
                    sync_state::Column::NextPageCursor,
                    Expr::value(None::<JsonValue>),
                )
                .col_expr(sync_state::Column::PagesFetched, Expr::value(0))
                .col_expr(sync_state::Column::RecordsSynced, Expr::value(0))
                .col_expr(
                    sync_state::Column::FinishedAt,
                    Expr::value(None::<DateTimeWithTimeZone>),
                )
                .col_expr(sync_state::Column::LastError, Expr::value(None::<String>));
        }

        let result = update
            .filter(sync_state::Column::ConnectionId.eq(connection_id))
            .filter(sync_state::Column::Status.eq(prior_status.as_str()))
            .filter(
                Condition::any()
                    .add(sync_state::Column::LeaseOwnerToken.is_null())
                    .add(sync_state::Column::LeaseExpiresAt.is_null())
                    .add(sync_state::Column::LeaseExpiresAt.lte(now)),
            )
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Persists the checkpoint after a page was applied: advances the cursor,
    /// adds one fetched page and the applied record count. Fenced; false
    /// means the lease was lost.
    pub async fn persist_progress(
        &self,
        connection_id: Uuid,
        token: Uuid,
        next_cursor: Option<JsonValue>,
        records_added: i32,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = SyncState::update_many()
            .col_expr(sync_state::Column::NextPageCursor, Expr::value(next_cursor))
            .col_expr(
                sync_state::Column::PagesFetched,
                Expr::value(Expr::col(sync_state::Column::PagesFetched).add(1)),
            )
            .col_expr(
                sync_state::Column::RecordsSynced,
                Expr::value(Expr::col(sync_state::Column::RecordsSynced).add(records_added)),
            )
            .col_expr(sync_state::Column::UpdatedAt, Expr::value(now))
            .filter(sync_state::Column::ConnectionId.eq(connection_id))
            .filter(sync_state::Column::LeaseOwnerToken.eq(token))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Records a rate-limit pause: sets the backoff hint, clears the lease,
    /// leaves status, cursor, and counters untouched. Fenced.
    pub async fn pause_rate_limited(
        &self,
        connection_id: Uuid,
        token: Uuid,
        retry_after: DateTimeWithTimeZone,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = SyncState::update_many()
            .col_expr(
                sync_state::Column::RetryAfter,
                Expr::value(Some(retry_after)),
            )
            .col_expr(
                sync_state::Column::LeaseOwnerToken,
                Expr::value(None::<Uuid>),
            )
            .col_expr(
                sync_state::Column::LeaseExpiresAt,
                Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(sync_state::Column::UpdatedAt, Expr::value(now))
            .filter(sync_state::Column::ConnectionId.eq(connection_id))
            .filter(sync_state::Column::LeaseOwnerToken.eq(token))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Yields the run without finishing the cycle: status stays `running`,
    /// the lease is released, the persisted cursor resumes on the next tick.
    /// Fenced.
    pub async fn yield_run(&self, connection_id: Uuid, token: Uuid) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = SyncState::update_many()
            .col_expr(
                sync_state::Column::LeaseOwnerToken,
                Expr::value(None::<Uuid>),
            )
            .col_expr(
                sync_state::Column::LeaseExpiresAt,
                Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(sync_state::Column::UpdatedAt, Expr::value(now))
            .filter(sync_state::Column::ConnectionId.eq(connection_id))
            .filter(sync_state::Column::LeaseOwnerToken.eq(token))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Terminates the cycle successfully: status `done`, `finished_at`
    /// stamped, lease, error, and backoff cleared. Fenced.
    pub async fn complete(&self, connection_id: Uuid, token: Uuid) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = SyncState::update_many()
            .col_expr(
                sync_state::Column::Status,
                Expr::value(SyncStatus::Done.as_str()),
            )
            .col_expr(sync_state::Column::FinishedAt, Expr::value(Some(now)))
            .col_expr(sync_state::Column::LastError, Expr::value(None::<String>))
            .col_expr(
                sync_state::Column::RetryAfter,
                Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(
                sync_state::Column::LeaseOwnerToken,
                Expr::value(None::<Uuid>),
            )
            .col_expr(
                sync_state::Column::LeaseExpiresAt,
                Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(sync_state::Column::UpdatedAt, Expr::value(now))
            .filter(sync_state::Column::ConnectionId.eq(connection_id))
            .filter(sync_state::Column::LeaseOwnerToken.eq(token))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Terminates the cycle in `error`, keeping the cursor so the next
    /// attempt retries the same page. Fenced.
    pub async fn fail(
        &self,
        connection_id: Uuid,
        token: Uuid,
        message: &str,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = SyncState::update_many()
            .col_expr(
                sync_state::Column::Status,
                Expr::value(SyncStatus::Error.as_str()),
            )
            .col_expr(
                sync_state::Column::LastError,
                Expr::value(Some(message.to_string())),
            )
            .col_expr(sync_state::Column::FinishedAt, Expr::value(Some(now)))
            .col_expr(
                sync_state::Column::LeaseOwnerToken,
                Expr::value(None::<Uuid>),
            )
            .col_expr(
                sync_state::Column::LeaseExpiresAt,
                Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(sync_state::Column::UpdatedAt, Expr::value(now))
            .filter(sync_state::Column::ConnectionId.eq(connection_id))
            .filter(sync_state::Column::LeaseOwnerToken.eq(token))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Forcible reset: back to `idle` with the cursor at start, counters
    /// zeroed, any lease revoked. Deliberately unfenced; an in-flight run
    /// loses its fence and aborts on its next write.
    pub async fn restart(&self, connection_id: Uuid) -> Result<sync_state::Model, DbErr> {
        self.get_or_create(connection_id).await?;

        let now = Utc::now().fixed_offset();
        SyncState::update_many()
            .col_expr(
                sync_state::Column::Status,
                Expr::value(SyncStatus::Idle.as_str()),
            )
            .col_expr(
                sync_state::Column::NextPageCursor,
                Expr::value(None::<JsonValue>),
            )
            .col_expr(sync_state::Column::PagesFetched, Expr::value(0))
            .col_expr(sync_state::Column::RecordsSynced, Expr::value(0))
            .col_expr(
                sync_state::Column::LeaseOwnerToken,
                Expr::value(None::<Uuid>),
            )
            .col_expr(
                sync_state::Column::LeaseExpiresAt,
                Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(
                sync_state::Column::RetryAfter,
                Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(
                sync_state::Column::StartedAt,
                Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(
                sync_state::Column::FinishedAt,
                Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(sync_state::Column::LastError, Expr::value(None::<String>))
            .col_expr(sync_state::Column::UpdatedAt, Expr::value(now))
            .filter(sync_state::Column::ConnectionId.eq(connection_id))
            .exec(&*self.db)
            .await?;

        self.get_by_connection(connection_id)
            .await?
            .ok_or_else(|| DbErr::Custom("sync state not persisted".to_string()))
    }

    /// Deletes the sync state for a connection
    pub async fn delete_by_connection(&self, connection_id: Uuid) -> Result<u64, DbErr> {
        let result = SyncState::delete_many()
            .filter(sync_state::Column::ConnectionId.eq(connection_id))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
