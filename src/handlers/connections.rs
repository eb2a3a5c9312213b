//! # Connection API Handlers
//!
//! Handlers for linking provider accounts, listing and inspecting
//! connections, editing caller-owned fields, rotating credentials, and
//! disconnecting. Secrets enter through these endpoints but never leave:
//! responses carry a masked preview at most.

use crate::auth::OperatorAuth;
use crate::cursor::ListCursor;
use crate::error::{ApiError, validation_error};
use crate::handlers::types::PaginatedResponse;
use crate::models::connection;
use crate::registry::{ConnectionChanges, UpsertConnection};
use crate::server::AppState;
use crate::vault::CredentialPreview;
use axum::{
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Query parameters for connection listing
#[derive(Debug, Deserialize, Serialize, IntoParams)]
pub struct ListConnectionsQuery {
    /// Owner whose connections to list
    #[param(value_type = String)]
    pub owner_id: Uuid,
    /// Maximum number of connections to return (default: 50, max: 100)
    pub limit: Option<u64>,
    /// Opaque cursor for pagination continuation
    pub cursor: Option<String>,
}

/// Masked view of stored credentials
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CredentialSummary {
    /// Masked secret preview, e.g. `****7f3a`
    pub masked: String,
    /// Expiration timestamp reported at store time, if any
    pub expires_at: Option<String>,
    /// When the secret was last replaced
    pub rotated_at: Option<String>,
}

impl From<CredentialPreview> for CredentialSummary {
    fn from(preview: CredentialPreview) -> Self {
        Self {
            masked: preview.masked,
            expires_at: preview.expires_at.map(|dt| dt.to_rfc3339()),
            rotated_at: preview.rotated_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// Connection information for API responses
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionInfo {
    /// Unique identifier for the connection
    #[schema(value_type = String)]
    pub id: Uuid,
    /// Owner this connection belongs to
    #[schema(value_type = String)]
    pub owner_id: Uuid,
    /// Provider key (e.g., "vimeo", "broker")
    pub provider_key: String,
    /// Caller-supplied label
    pub display_name: Option<String>,
    /// Lifecycle status: connected, disconnected, or error
    pub status: String,
    /// Whether this is the owner's default connection for the provider
    pub is_default: bool,
    /// Human-readable detail for the error status
    pub last_error: Option<String>,
    /// When a sync run last completed
    pub last_synced_at: Option<String>,
    /// Most recent upstream activity observed
    pub last_activity_at: Option<String>,
    /// Provider-specific metadata
    pub metadata: serde_json::Value,
    /// Masked credential preview; present only on single-connection reads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialSummary>,
    pub created_at: String,
    pub updated_at: String,
}

fn rfc3339(dt: DateTimeWithTimeZone) -> String {
    let utc: DateTime<Utc> = dt.with_timezone(&Utc);
    utc.to_rfc3339()
}

impl From<connection::Model> for ConnectionInfo {
    fn from(model: connection::Model) -> Self {
        Self {
            id: model.id,
            owner_id: model.owner_id,
            provider_key: model.provider_key,
            display_name: model.display_name,
            status: model.status,
            is_default: model.is_default,
            last_error: model.last_error,
            last_synced_at: model.last_synced_at.map(rfc3339),
            last_activity_at: model.last_activity_at.map(rfc3339),
            metadata: model.metadata.unwrap_or_default(),
            credentials: None,
            created_at: rfc3339(model.created_at),
            updated_at: rfc3339(model.updated_at),
        }
    }
}

/// Credentials supplied when linking or rotating
#[derive(Debug, Deserialize, ToSchema)]
pub struct CredentialsInput {
    /// The provider secret (API token, key, ...); never echoed back
    pub secret: String,
    /// Optional expiration the provider reported for the secret
    #[schema(value_type = Option<String>, format = DateTime)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Request body for linking a provider account
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertConnectionRequest {
    /// Owner to link the provider account for
    #[schema(value_type = String)]
    pub owner_id: Uuid,
    /// Provider key (e.g., "vimeo", "broker")
    pub provider_key: String,
    pub credentials: CredentialsInput,
    /// Optional label shown in listings
    pub display_name: Option<String>,
    /// Provider-specific metadata to store on the connection
    pub metadata: Option<serde_json::Value>,
}

/// Request body for editing a connection
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateConnectionRequest {
    pub display_name: Option<String>,
    /// Only "connected" and "disconnected" may be set here
    pub status: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

fn validate_secret(secret: &str) -> Result<(), ApiError> {
    if secret.trim().is_empty() {
        return Err(validation_error(
            "Validation failed",
            json!({"credentials.secret": "secret must not be empty"}),
        ));
    }
    Ok(())
}

/// Links an owner to a provider, or re-links an existing default connection
#[utoipa::path(
    post,
    path = "/v1/connections",
    security(("bearer_auth" = [])),
    request_body = UpsertConnectionRequest,
    responses(
        (status = 201, description = "Connection created", body = ConnectionInfo),
        (status = 200, description = "Existing default connection re-linked", body = ConnectionInfo),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 422, description = "Unknown provider", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn create_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<UpsertConnectionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ConnectionInfo>), ApiError> {
    let Json(payload) = payload?;
    validate_secret(&payload.credentials.secret)?;

    let outcome = state
        .registry
        .upsert_for_owner(UpsertConnection {
            owner_id: payload.owner_id,
            provider_key: payload.provider_key,
            secret: payload.credentials.secret,
            display_name: payload.display_name,
            metadata: payload.metadata,
            expires_at: payload.credentials.expires_at,
        })
        .await?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ConnectionInfo::from(outcome.connection))))
}

/// Lists an owner's connections in creation order
#[utoipa::path(
    get,
    path = "/v1/connections",
    security(("bearer_auth" = [])),
    params(ListConnectionsQuery),
    responses(
        (status = 200, description = "Page of connections", body = PaginatedResponse<ConnectionInfo>),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn list_connections(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Query(query): Query<ListConnectionsQuery>,
) -> Result<Json<PaginatedResponse<ConnectionInfo>>, ApiError> {
    let limit = query.limit.unwrap_or(50);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "limit must be between 1 and 100",
        ));
    }

    let after = match query.cursor.as_deref() {
        Some(token) => {
            let cursor = ListCursor::decode(token)?;
            Some((cursor.key_at.fixed_offset(), cursor.id))
        }
        None => None,
    };

    let (connections, next_key) = state
        .registry
        .list_for_owner(query.owner_id, limit, after)
        .await?;

    let next_cursor = next_key
        .map(|(created_at, id)| ListCursor::new(created_at.with_timezone(&Utc), id).encode());
    let data = connections.into_iter().map(ConnectionInfo::from).collect();

    Ok(Json(PaginatedResponse::new(data, next_cursor)))
}

/// Fetches one connection with a masked credential preview
#[utoipa::path(
    get,
    path = "/v1/connections/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Connection identifier")
    ),
    responses(
        (status = 200, description = "Connection details", body = ConnectionInfo),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn get_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let model = state.registry.get(id).await?;
    let preview = state.vault.preview(id).await?;

    let mut info = ConnectionInfo::from(model);
    info.credentials = preview.map(CredentialSummary::from);
    Ok(Json(info))
}

/// Edits caller-owned connection fields
#[utoipa::path(
    patch,
    path = "/v1/connections/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Connection identifier")
    ),
    request_body = UpdateConnectionRequest,
    responses(
        (status = 200, description = "Updated connection", body = ConnectionInfo),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn update_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateConnectionRequest>, JsonRejection>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let Json(payload) = payload?;

    let updated = state
        .registry
        .update(
            id,
            ConnectionChanges {
                display_name: payload.display_name,
                status: payload.status,
                metadata: payload.metadata,
            },
        )
        .await?;

    Ok(Json(ConnectionInfo::from(updated)))
}

/// Replaces the stored secret for a connection
#[utoipa::path(
    post,
    path = "/v1/connections/{id}/credentials",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Connection identifier")
    ),
    request_body = CredentialsInput,
    responses(
        (status = 200, description = "Credentials rotated", body = ConnectionInfo),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn rotate_credentials(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    payload: Result<Json<CredentialsInput>, JsonRejection>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let Json(payload) = payload?;
    validate_secret(&payload.secret)?;

    let updated = state
        .registry
        .rotate_credentials(id, &payload.secret, payload.expires_at)
        .await?;

    Ok(Json(ConnectionInfo::from(updated)))
}

/// Removes a connection and everything derived from it
#[utoipa::path(
    delete,
    path = "/v1/connections/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Connection identifier")
    ),
    responses(
        (status = 204, description = "Connection removed"),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::server::{build_state, create_app};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use migration::MigratorTrait;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_app() -> axum::Router {
        let config = AppConfig {
            operator_token: Some("test-token-123".to_string()),
            credential_key: Some(vec![7u8; 32]),
            ..Default::default()
        };
        let db = sea_orm::Database::connect("sqlite::memory:").await.unwrap();
        migration::Migrator::up(&db, None).await.unwrap();
        let state = build_state(Arc::new(config), Arc::new(db)).unwrap();
        create_app(state)
    }

    fn authed(builder: axum::http::request::Builder) -> axum::http::request::Builder {
        builder.header("Authorization", "Bearer test-token-123")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_rejects_missing_token() {
        let app = test_app().await;

        let request = Request::builder()
            .method("POST")
            .uri("/v1/connections")
            .header("content-type", "application/json")
            .body(Body::from(r#"{}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_rejects_empty_secret() {
        let app = test_app().await;

        let payload = serde_json::json!({
            "owner_id": Uuid::new_v4(),
            "provider_key": "vimeo",
            "credentials": {"secret": "   "}
        });
        let request = authed(Request::builder().method("POST").uri("/v1/connections"))
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn create_rejects_unknown_provider() {
        let app = test_app().await;

        let payload = serde_json::json!({
            "owner_id": Uuid::new_v4(),
            "provider_key": "telegraph",
            "credentials": {"secret": "tok-1"}
        });
        let request = authed(Request::builder().method("POST").uri("/v1/connections"))
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn create_then_relink_updates_in_place() {
        let app = test_app().await;
        let owner_id = Uuid::new_v4();

        let payload = serde_json::json!({
            "owner_id": owner_id,
            "provider_key": "vimeo",
            "credentials": {"secret": "tok-first"}
        });
        let response = app
            .clone()
            .oneshot(
                authed(Request::builder().method("POST").uri("/v1/connections"))
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["status"], "connected");
        assert_eq!(created["is_default"], true);

        // Linking the same provider again reuses the default connection.
        let payload = serde_json::json!({
            "owner_id": owner_id,
            "provider_key": "vimeo",
            "credentials": {"secret": "tok-second"}
        });
        let response = app
            .oneshot(
                authed(Request::builder().method("POST").uri("/v1/connections"))
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let relinked = body_json(response).await;
        assert_eq!(relinked["id"], created["id"]);
    }

    #[tokio::test]
    async fn get_returns_masked_credentials_only() {
        let app = test_app().await;
        let owner_id = Uuid::new_v4();

        let payload = serde_json::json!({
            "owner_id": owner_id,
            "provider_key": "vimeo",
            "credentials": {"secret": "super-secret-7f3a"}
        });
        let response = app
            .clone()
            .oneshot(
                authed(Request::builder().method("POST").uri("/v1/connections"))
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let created = body_json(response).await;
        let id = created["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                authed(Request::builder().uri(format!("/v1/connections/{}", id)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;

        let masked = body["credentials"]["masked"].as_str().unwrap();
        assert!(masked.ends_with("7f3a"));
        assert!(!body.to_string().contains("super-secret-7f3a"));
    }

    #[tokio::test]
    async fn list_pages_through_all_connections() {
        let app = test_app().await;
        let owner_id = Uuid::new_v4();

        // The broker provider allows several connections per owner.
        for i in 0..3 {
            let payload = serde_json::json!({
                "owner_id": owner_id,
                "provider_key": "broker",
                "credentials": {"secret": format!("tok-{}", i)}
            });
            let response = app
                .clone()
                .oneshot(
                    authed(Request::builder().method("POST").uri("/v1/connections"))
                        .header("content-type", "application/json")
                        .body(Body::from(payload.to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = app
            .clone()
            .oneshot(
                authed(Request::builder().uri(format!(
                    "/v1/connections?owner_id={}&limit=2",
                    owner_id
                )))
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let first_page = body_json(response).await;
        assert_eq!(first_page["data"].as_array().unwrap().len(), 2);
        let cursor = first_page["next_cursor"].as_str().unwrap().to_string();

        // Standard base64 cursors need form encoding inside a query string.
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("owner_id", &owner_id.to_string())
            .append_pair("limit", "2")
            .append_pair("cursor", &cursor)
            .finish();
        let response = app
            .oneshot(
                authed(Request::builder().uri(format!("/v1/connections?{}", query)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let second_page = body_json(response).await;
        assert_eq!(second_page["data"].as_array().unwrap().len(), 1);
        assert!(second_page["next_cursor"].is_null());
    }

    #[tokio::test]
    async fn list_rejects_out_of_range_limit() {
        let app = test_app().await;

        let response = app
            .oneshot(
                authed(Request::builder().uri(format!(
                    "/v1/connections?owner_id={}&limit=101",
                    Uuid::new_v4()
                )))
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_rejects_error_status() {
        let app = test_app().await;
        let owner_id = Uuid::new_v4();

        let payload = serde_json::json!({
            "owner_id": owner_id,
            "provider_key": "vimeo",
            "credentials": {"secret": "tok-1"}
        });
        let response = app
            .clone()
            .oneshot(
                authed(Request::builder().method("POST").uri("/v1/connections"))
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let created = body_json(response).await;
        let id = created["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                authed(
                    Request::builder()
                        .method("PATCH")
                        .uri(format!("/v1/connections/{}", id)),
                )
                .header("content-type", "application/json")
                .body(Body::from(r#"{"status": "error"}"#))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_removes_connection() {
        let app = test_app().await;
        let owner_id = Uuid::new_v4();

        let payload = serde_json::json!({
            "owner_id": owner_id,
            "provider_key": "vimeo",
            "credentials": {"secret": "tok-1"}
        });
        let response = app
            .clone()
            .oneshot(
                authed(Request::builder().method("POST").uri("/v1/connections"))
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let created = body_json(response).await;
        let id = created["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method("DELETE")
                        .uri(format!("/v1/connections/{}", id)),
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                authed(Request::builder().uri(format!("/v1/connections/{}", id)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
