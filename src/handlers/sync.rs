//! # Sync State API Handlers
//!
//! Exposes the per-connection sync run summary and the forcible restart.
//! Restart clears the lease, so an in-flight run loses its fence and its
//! remaining writes become no-ops.

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::models::sync_state::{self, SyncStatus};
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Sync run summary for API responses
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncStateInfo {
    /// Run status: idle, running, done, or error
    pub status: String,
    /// Non-empty pages fetched during the current cycle
    pub pages_fetched: i32,
    /// Records applied during the current cycle
    pub records_synced: i32,
    /// When the current cycle began
    pub started_at: Option<String>,
    /// When the last run finished
    pub finished_at: Option<String>,
    /// Earliest moment the next run may start, set after rate limiting
    pub retry_after: Option<String>,
    /// Detail for the error status
    pub last_error: Option<String>,
}

fn rfc3339(dt: DateTimeWithTimeZone) -> String {
    let utc: DateTime<Utc> = dt.with_timezone(&Utc);
    utc.to_rfc3339()
}

impl From<sync_state::Model> for SyncStateInfo {
    fn from(model: sync_state::Model) -> Self {
        Self {
            status: model.status,
            pages_fetched: model.pages_fetched,
            records_synced: model.records_synced,
            started_at: model.started_at.map(rfc3339),
            finished_at: model.finished_at.map(rfc3339),
            retry_after: model.retry_after.map(rfc3339),
            last_error: model.last_error,
        }
    }
}

impl SyncStateInfo {
    /// Summary for a connection that has never attempted a sync. The row is
    /// created lazily by the scheduler, so reads must not create it.
    fn never_ran() -> Self {
        Self {
            status: SyncStatus::Idle.as_str().to_string(),
            pages_fetched: 0,
            records_synced: 0,
            started_at: None,
            finished_at: None,
            retry_after: None,
            last_error: None,
        }
    }
}

/// Returns the sync run summary for a connection
#[utoipa::path(
    get,
    path = "/v1/connections/{id}/sync",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Connection identifier")
    ),
    responses(
        (status = 200, description = "Sync run summary", body = SyncStateInfo),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn get_sync_state(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncStateInfo>, ApiError> {
    state.registry.get(id).await?;

    let info = match state.sync_states.get_by_connection(id).await? {
        Some(model) => SyncStateInfo::from(model),
        None => SyncStateInfo::never_ran(),
    };
    Ok(Json(info))
}

/// Forcibly resets a connection's sync progress
#[utoipa::path(
    post,
    path = "/v1/connections/{id}/sync/restart",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Connection identifier")
    ),
    responses(
        (status = 200, description = "Sync state reset to idle", body = SyncStateInfo),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn restart_sync(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncStateInfo>, ApiError> {
    state.registry.get(id).await?;

    let reset = state.sync_states.restart(id).await?;
    tracing::info!(connection_id = %id, "Sync state restarted");
    Ok(Json(SyncStateInfo::from(reset)))
}
