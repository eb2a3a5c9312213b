//! # Mirrored Record API Handlers
//!
//! Read-only listing of the records a connection has mirrored from its
//! provider. Soft-deleted records are hidden unless asked for.

use crate::auth::OperatorAuth;
use crate::cursor::ListCursor;
use crate::error::ApiError;
use crate::handlers::types::PaginatedResponse;
use crate::models::mirrored_record;
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Query parameters for record listing
#[derive(Debug, Deserialize, Serialize, IntoParams)]
pub struct ListRecordsQuery {
    /// Maximum number of records to return (default: 50, max: 100)
    pub limit: Option<u64>,
    /// Opaque cursor for pagination continuation
    pub cursor: Option<String>,
    /// Include records upstream has deleted (default: false)
    pub include_deleted: Option<bool>,
}

/// Mirrored record information for API responses
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RecordInfo {
    /// Unique identifier for the record row
    #[schema(value_type = String)]
    pub id: Uuid,
    /// Upstream's immutable identifier
    pub external_id: String,
    /// Provider record category (e.g., "video", "order")
    pub kind: String,
    /// The record body as upstream sent it
    pub payload: serde_json::Value,
    /// Set when upstream reported the record removed
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn rfc3339(dt: DateTimeWithTimeZone) -> String {
    let utc: DateTime<Utc> = dt.with_timezone(&Utc);
    utc.to_rfc3339()
}

impl From<mirrored_record::Model> for RecordInfo {
    fn from(model: mirrored_record::Model) -> Self {
        Self {
            id: model.id,
            external_id: model.external_id,
            kind: model.kind,
            payload: model.payload,
            deleted_at: model.deleted_at.map(rfc3339),
            created_at: rfc3339(model.created_at),
            updated_at: rfc3339(model.updated_at),
        }
    }
}

/// Lists the records a connection has mirrored, in creation order
#[utoipa::path(
    get,
    path = "/v1/connections/{id}/records",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Connection identifier"),
        ListRecordsQuery
    ),
    responses(
        (status = 200, description = "Page of mirrored records", body = PaginatedResponse<RecordInfo>),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError)
    ),
    tag = "records"
)]
pub async fn list_records(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    Query(query): Query<ListRecordsQuery>,
) -> Result<Json<PaginatedResponse<RecordInfo>>, ApiError> {
    let limit = query.limit.unwrap_or(50);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "limit must be between 1 and 100",
        ));
    }

    state.registry.get(id).await?;

    let after = match query.cursor.as_deref() {
        Some(token) => {
            let cursor = ListCursor::decode(token)?;
            Some((cursor.key_at.fixed_offset(), cursor.id))
        }
        None => None,
    };

    let (records, next_key) = state
        .records
        .list_by_connection(id, limit, after, query.include_deleted.unwrap_or(false))
        .await?;

    let next_cursor = next_key
        .map(|(created_at, id)| ListCursor::new(created_at.with_timezone(&Utc), id).encode());
    let data = records.into_iter().map(RecordInfo::from).collect();

    Ok(Json(PaginatedResponse::new(data, next_cursor)))
}
