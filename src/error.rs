//! # Error Handling
//!
//! Every failure that reaches the HTTP surface is rendered as a problem+json
//! [`ApiError`]. Domain errors convert into it here, in one place, so SQL
//! detail and ciphertext never leak into a response body.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::registry::RegistryError;
use crate::vault::VaultError;

/// Problem+json payload returned for every failed request.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status of the response; not part of the body.
    #[serde(skip_serializing)]
    #[schema(ignore)]
    pub status: StatusCode,
    /// Stable machine-readable code in SCREAMING_SNAKE_CASE.
    pub code: String,
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Structured context, typically per-field validation notes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Seconds the caller should wait before retrying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<serde_json::Value>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        if let Some(seconds) = self.retry_after
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            headers.insert(header::RETRY_AFTER, value);
        }
        (self.status, headers, axum::Json(self)).into_response()
    }
}

/// 401 with an optional custom message.
pub fn unauthorized(message: Option<&str>) -> ApiError {
    ApiError::new(
        StatusCode::UNAUTHORIZED,
        "UNAUTHORIZED",
        message.unwrap_or("Authentication required"),
    )
}

/// 400 carrying per-field detail for the caller.
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

/// Detects unique-constraint violations across the Postgres and SQLite
/// backends so callers can surface them as conflicts instead of 500s.
pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    match db_error.code() {
        Some(code) => {
            let code = code.as_ref();
            code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
        }
        None => false,
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!(error = ?error, "unhandled internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => {
                format!("Request body does not match the expected shape: {err}")
            }
            JsonRejection::JsonSyntaxError(err) => {
                format!("Request body is not valid JSON: {err}")
            }
            JsonRejection::MissingJsonContentType(_) => {
                "Requests must declare 'Content-Type: application/json'".to_string()
            }
            _ => "Request body could not be read".to_string(),
        };
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "unique constraint violation");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(what) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Record not found: {what}"),
            ),
            sea_orm::DbErr::Conn(err) => {
                tracing::error!(error = ?err, "database connection failed");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!(error = ?other, "database operation failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(error: VaultError) -> Self {
        match error {
            VaultError::NotFound(_) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "No credentials stored for this connection",
            ),
            VaultError::Crypto(err) => {
                tracing::error!(error = %err, "credential envelope could not be processed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Credential envelope could not be processed",
                )
            }
            VaultError::Database(err) => err.into(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::NotFound(id) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Connection '{id}' not found"),
            ),
            RegistryError::UnknownProvider(key) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNKNOWN_PROVIDER",
                format!("Provider '{key}' is not registered"),
            ),
            RegistryError::DuplicateDefault => Self::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                "A default connection already exists for this owner and provider",
            ),
            RegistryError::InvalidStatus(status) => Self::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                format!("Status '{status}' cannot be set through this endpoint"),
            ),
            RegistryError::Vault(err) => err.into(),
            RegistryError::Database(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_response_is_problem_json_with_status() {
        let response = ApiError::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists")
            .into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_retry_after_lands_in_header_and_body() {
        let error = ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Rate limit exceeded",
        )
        .with_retry_after(60);
        assert_eq!(error.retry_after, Some(60));

        let response = error.into_response();
        assert_eq!(response.headers().get("retry-after").unwrap(), "60");
    }

    #[test]
    fn test_validation_error_carries_field_detail() {
        let fields = json!({
            "owner_id": "owner_id is required",
            "provider_key": "provider_key is required"
        });
        let error = validation_error("Validation failed", fields.clone());

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.code, "VALIDATION_FAILED");
        assert_eq!(error.details, Some(fields));
    }

    #[test]
    fn test_unauthorized_helper_defaults_message() {
        let error = unauthorized(None);
        assert_eq!(error.status, StatusCode::UNAUTHORIZED);
        assert_eq!(error.message, "Authentication required");

        let custom = unauthorized(Some("Invalid bearer token"));
        assert_eq!(custom.message, "Invalid bearer token");
    }

    #[test]
    fn test_anyhow_collapses_to_opaque_500() {
        let error: ApiError = anyhow::anyhow!("pool exhausted on shard 3").into();

        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message, "An internal error occurred");
    }

    #[test]
    fn test_database_record_not_found_maps_to_404() {
        let error: ApiError = sea_orm::DbErr::RecordNotFound("sync_states".to_string()).into();

        assert_eq!(error.status, StatusCode::NOT_FOUND);
        assert!(error.message.contains("sync_states"));
    }

    #[test]
    fn test_registry_errors_map_to_expected_statuses() {
        let id = Uuid::new_v4();
        let not_found: ApiError = RegistryError::NotFound(id).into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        assert!(not_found.message.contains(&id.to_string()));

        let unknown: ApiError = RegistryError::UnknownProvider("papyrus".to_string()).into();
        assert_eq!(unknown.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(unknown.code, "UNKNOWN_PROVIDER");

        let duplicate: ApiError = RegistryError::DuplicateDefault.into();
        assert_eq!(duplicate.status, StatusCode::CONFLICT);

        let bad_status: ApiError = RegistryError::InvalidStatus("error".to_string()).into();
        assert_eq!(bad_status.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_vault_crypto_failure_stays_opaque() {
        let error: ApiError = VaultError::Crypto(crate::crypto::CryptoError::DecryptionFailed).into();

        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!error.message.contains("tag"));
        assert!(error.details.is_none());
    }
}
