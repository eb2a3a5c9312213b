//! Tests for the service-level handlers.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::handlers::root;
use crate::models::ServiceInfo;
use crate::server::{build_state, create_app};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Json,
};
use migration::MigratorTrait;
use serde_json::Value;
use tower::ServiceExt;

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let Json(service_info) = root().await;

    assert_eq!(service_info.service, "syncline");
    assert_eq!(service_info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_root_handler_returns_valid_json() {
    let Json(service_info) = root().await;

    let json_value: Value =
        serde_json::to_value(&service_info).expect("Failed to serialize ServiceInfo");

    assert_eq!(
        json_value.get("service").and_then(Value::as_str),
        Some("syncline")
    );
    assert!(json_value.get("version").is_some());
}

#[tokio::test]
async fn test_service_info_default() {
    let service_info = ServiceInfo::default();

    assert_eq!(service_info.service, "syncline");
    assert_eq!(service_info.version, env!("CARGO_PKG_VERSION"));
}

async fn probe_app() -> axum::Router {
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

#[tokio::test]
async fn test_probes_do_not_require_auth() {
    let app = probe_app().await;

    for path in ["/", "/healthz", "/readyz"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "probe {path}");
    }
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = probe_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 4 * 1024 * 1024)
        .await
        .unwrap();
    let doc: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(doc["paths"]["/v1/connections"].is_object());
    assert!(doc["paths"]["/webhooks/{provider_key}/{connection_id}"].is_object());
}

#[tokio::test]
async fn test_operator_routes_reject_without_token() {
    let app = probe_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/providers")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
