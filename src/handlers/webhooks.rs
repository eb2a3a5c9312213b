//! # Webhook API Handlers
//!
//! Push-based ingestion: providers post events here, the signature is
//! verified before the body is trusted, and verified events flow through
//! the same idempotent upsert path as polling. Duplicate delivery is
//! harmless by construction.

use crate::error::ApiError;
use crate::models::connection;
use crate::server::AppState;
use crate::sync_runner::validated_upserts;
use crate::webhook_verification::verify_webhook;
use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Webhook bodies above this size are rejected before parsing.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Response for accepted webhook deliveries
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAcceptResponse {
    /// Always "accepted"
    pub status: String,
    /// Records applied from this delivery
    pub applied: u64,
}

/// Looks up the target connection; a missing row and a provider mismatch
/// are indistinguishable to the caller.
async fn target_connection(
    state: &AppState,
    provider_key: &str,
    connection_id: Uuid,
) -> Result<connection::Model, ApiError> {
    let not_found = || {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "No such connection for this provider",
        )
    };

    let model = state
        .connections
        .get_by_id(connection_id)
        .await?
        .ok_or_else(not_found)?;
    if model.provider_key != provider_key {
        return Err(not_found());
    }
    Ok(model)
}

/// Receives a provider event for one connection
#[utoipa::path(
    post,
    path = "/webhooks/{provider_key}/{connection_id}",
    params(
        ("provider_key" = String, Path, description = "Provider the event comes from"),
        ("connection_id" = String, Path, description = "Connection the event targets")
    ),
    request_body(content = Option<serde_json::Value>, description = "Provider event payload", content_type = "application/json"),
    responses(
        (status = 202, description = "Event accepted", body = WebhookAcceptResponse),
        (status = 400, description = "Unparseable event payload", body = ApiError),
        (status = 401, description = "Signature verification failed", body = ApiError),
        (status = 404, description = "Unknown provider or connection", body = ApiError),
        (status = 429, description = "Rate limited", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn ingest_webhook(
    State(state): State<AppState>,
    Path((provider_key, connection_id)): Path<(String, Uuid)>,
    request: Request,
) -> Result<(StatusCode, Json<WebhookAcceptResponse>), ApiError> {
    let client = state.providers.get(&provider_key).ok_or_else(|| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            &format!("Provider '{}' is not registered", provider_key),
        )
    })?;

    let headers = request.headers().clone();
    let body = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|_| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                "Request body unreadable or too large",
            )
        })?;

    // Nothing below runs for a caller that cannot prove it holds the secret.
    verify_webhook(&provider_key, &body, &headers, &state.config).map_err(|error| {
        warn!(provider = %provider_key, %error, "Webhook verification failed");
        let labels = vec![("provider", provider_key.clone())];
        counter!("webhook_rejected_total", &labels).increment(1);
        ApiError::new(
            error.status_code(),
            "UNAUTHORIZED",
            "Webhook verification failed",
        )
    })?;

    let connection = target_connection(&state, &provider_key, connection_id).await?;

    // Webhooks share the limiter with polling but under their own scope, so
    // a chatty provider cannot starve scheduled runs.
    let scope = format!("{}|webhook", connection_id);
    let decision = state.limiter.check(&provider_key, &scope);
    if !decision.allowed {
        let retry_after = decision.retry_after.map(|d| d.as_secs().max(1)).unwrap_or(1);
        let labels = vec![("provider", provider_key.clone())];
        counter!("webhook_throttled_total", &labels).increment(1);
        return Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Webhook rate limit exceeded",
        )
        .with_retry_after(retry_after));
    }

    let records = client.parse_webhook(&body).map_err(|error| {
        debug!(provider = %provider_key, %error, "Webhook payload rejected");
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Event payload could not be parsed",
        )
    })?;

    let (upserts, max_activity, skipped) = validated_upserts(records);
    if skipped > 0 {
        warn!(
            provider = %provider_key,
            connection_id = %connection_id,
            skipped,
            "Webhook records dropped for missing external ids"
        );
    }

    let stats = state.records.upsert_batch(connection.id, &upserts).await?;
    state
        .connections
        .mark_activity(connection.id, max_activity.unwrap_or_else(Utc::now))
        .await?;

    let labels = vec![("provider", provider_key.clone())];
    counter!("webhook_events_total", &labels).increment(1);
    counter!("webhook_records_total", &labels).increment(stats.applied());
    debug!(
        provider = %provider_key,
        connection_id = %connection_id,
        applied = stats.applied(),
        "Webhook delivery applied"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAcceptResponse {
            status: "accepted".to_string(),
            applied: stats.applied(),
        }),
    ))
}
