//! # Operator Authentication
//!
//! Bearer-token middleware for the operator API. Health probes, the
//! OpenAPI surface, and webhook ingress are routed outside this layer;
//! webhooks carry their own per-provider verification.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized};

/// Marker inserted into request extensions once the bearer token checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

/// Validates `Authorization: Bearer <token>` against the configured operator
/// token before letting the request through.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;
    let presented = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))?;

    // An absent token means config validation never ran for this profile;
    // stay closed rather than open.
    let configured = config
        .operator_token
        .as_deref()
        .ok_or_else(|| unauthorized(Some("Operator token not configured")))?;

    let matches: bool = ConstantTimeEq::ct_eq(presented.as_bytes(), configured.as_bytes()).into();
    if !matches {
        return Err(unauthorized(Some("Invalid bearer token")));
    }

    request.extensions_mut().insert(OperatorAuth);
    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for OperatorAuth
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Operator authentication required")))
    }
}
