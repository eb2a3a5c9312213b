//! # API Handlers
//!
//! HTTP endpoint handlers for the Syncline API: connection management,
//! sync state inspection, mirrored record listing, provider discovery,
//! and webhook ingestion.

pub mod connections;
pub mod providers;
pub mod records;
pub mod sync;
pub mod types;
pub mod webhooks;

use crate::db;
use crate::error::ApiError;
use crate::models::ServiceInfo;
use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::Json};

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "service"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service is alive")
    ),
    tag = "service"
)]
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe that verifies the database answers
#[utoipa::path(
    get,
    path = "/readyz",
    responses(
        (status = 200, description = "Service is ready"),
        (status = 503, description = "Database unreachable", body = ApiError)
    ),
    tag = "service"
)]
pub async fn readyz(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    db::health_check(&state.db).await.map_err(|error| {
        tracing::warn!("Readiness check failed: {:#}", error);
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Database is not reachable",
        )
    })?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests;
