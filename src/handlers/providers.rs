//! # Provider API Handlers
//!
//! Discovery endpoint for the providers this deployment can talk to.

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::providers::ProviderDescriptor;
use crate::server::AppState;
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response containing the registered providers
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderDescriptor>,
}

/// Lists the providers registered in this deployment
#[utoipa::path(
    get,
    path = "/v1/providers",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Registered providers", body = ProvidersResponse, example = json!({
            "providers": [
                {
                    "key": "broker",
                    "display_name": "Broker",
                    "allows_multiple": true,
                    "supports_webhooks": true
                },
                {
                    "key": "vimeo",
                    "display_name": "Vimeo",
                    "allows_multiple": false,
                    "supports_webhooks": true
                }
            ]
        })),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "providers"
)]
pub async fn list_providers(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: state.providers.descriptors(),
    })
}
