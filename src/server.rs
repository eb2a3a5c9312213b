//! # Server Configuration
//!
//! Router assembly, shared application state, and the serve loop for the
//! Syncline API. Operator routes sit behind the bearer-token middleware;
//! probes, docs, and webhooks stay outside it (webhooks carry their own
//! signature check).

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use migration::MigratorTrait;
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::crypto::VaultKey;
use crate::db;
use crate::handlers;
use crate::providers::ProviderRegistry;
use crate::rate_limit::{RateLimiter, SlidingWindowLimiter};
use crate::registry::{DbRegistry, Registry};
use crate::repositories::{
    ConnectionRepository, CredentialEnvelopeRepository, MirroredRecordRepository,
    SyncStateRepository,
};
use crate::scheduler::SyncScheduler;
use crate::sync_runner::SyncRunner;
use crate::vault::{DbVault, Vault};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub registry: Arc<dyn Registry>,
    pub vault: Arc<dyn Vault>,
    pub providers: Arc<ProviderRegistry>,
    pub connections: ConnectionRepository,
    pub sync_states: SyncStateRepository,
    pub records: MirroredRecordRepository,
    pub limiter: Arc<dyn RateLimiter>,
}

/// Builds the shared state from configuration and an open database handle.
pub fn build_state(
    config: Arc<AppConfig>,
    db: Arc<DatabaseConnection>,
) -> anyhow::Result<AppState> {
    let key_bytes = config
        .credential_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("credential key is missing; set SYNCLINE_CREDENTIAL_KEY"))?;
    let vault_key = VaultKey::new(key_bytes)?;

    let vault: Arc<dyn Vault> = Arc::new(DbVault::new(
        CredentialEnvelopeRepository::new(db.clone()),
        vault_key,
    ));
    let providers = Arc::new(ProviderRegistry::from_config(&config.providers));
    let registry: Arc<dyn Registry> = Arc::new(DbRegistry::new(
        db.clone(),
        vault.clone(),
        providers.clone(),
    ));
    let limiter: Arc<dyn RateLimiter> = Arc::new(SlidingWindowLimiter::new(&config.rate_limit));

    Ok(AppState {
        connections: ConnectionRepository::new(db.clone()),
        sync_states: SyncStateRepository::new(db.clone()),
        records: MirroredRecordRepository::new(db.clone()),
        config,
        db,
        registry,
        vault,
        providers,
        limiter,
    })
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let operator_routes = Router::new()
        .route(
            "/v1/connections",
            post(handlers::connections::create_connection)
                .get(handlers::connections::list_connections),
        )
        .route(
            "/v1/connections/{id}",
            get(handlers::connections::get_connection)
                .patch(handlers::connections::update_connection)
                .delete(handlers::connections::delete_connection),
        )
        .route(
            "/v1/connections/{id}/credentials",
            post(handlers::connections::rotate_credentials),
        )
        .route("/v1/connections/{id}/sync", get(handlers::sync::get_sync_state))
        .route(
            "/v1/connections/{id}/sync/restart",
            post(handlers::sync::restart_sync),
        )
        .route(
            "/v1/connections/{id}/records",
            get(handlers::records::list_records),
        )
        .route("/v1/providers", get(handlers::providers::list_providers))
        .route_layer(axum::middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    let public_routes = Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route(
            "/webhooks/{provider_key}/{connection_id}",
            post(handlers::webhooks::ingest_webhook),
        );

    Router::new()
        .merge(operator_routes)
        .merge(public_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Cancels the shutdown token on SIGINT or SIGTERM.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(%error, "Failed to install Ctrl+C handler");
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(error) => tracing::error!(%error, "Failed to install SIGTERM handler"),
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        tracing::info!("Shutdown signal received");
        shutdown.cancel();
    });
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let db = Arc::new(db::init_pool(&config).await?);
    if config.auto_migrate {
        migration::Migrator::up(db.as_ref(), None).await?;
        tracing::info!("Database migrations applied");
    }

    let config = Arc::new(config);
    let state = build_state(config.clone(), db)?;

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let scheduler_handle = if config.scheduler.enabled {
        let runner = Arc::new(SyncRunner::new(
            state.connections.clone(),
            state.sync_states.clone(),
            state.records.clone(),
            state.vault.clone(),
            state.providers.clone(),
            state.limiter.clone(),
            config.scheduler.clone(),
        ));
        let scheduler = SyncScheduler::new(
            config.clone(),
            state.connections.clone(),
            state.sync_states.clone(),
            runner,
        );
        Some(tokio::spawn(scheduler.run(shutdown.clone())))
    } else {
        tracing::info!("Sync scheduler is disabled");
        None
    };

    let app = create_app(state);
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
        .await?;

    // The signal listener has already fired by the time serve returns, but
    // cancel again so a clean listener error also stops the scheduler.
    shutdown.cancel();
    if let Some(handle) = scheduler_handle {
        let _ = handle.await;
    }
    tracing::info!("Server stopped");

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::readyz,
        crate::handlers::connections::create_connection,
        crate::handlers::connections::list_connections,
        crate::handlers::connections::get_connection,
        crate::handlers::connections::update_connection,
        crate::handlers::connections::delete_connection,
        crate::handlers::connections::rotate_credentials,
        crate::handlers::sync::get_sync_state,
        crate::handlers::sync::restart_sync,
        crate::handlers::records::list_records,
        crate::handlers::providers::list_providers,
        crate::handlers::webhooks::ingest_webhook,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::connections::ConnectionInfo,
            crate::handlers::connections::CredentialSummary,
            crate::handlers::connections::CredentialsInput,
            crate::handlers::connections::UpsertConnectionRequest,
            crate::handlers::connections::UpdateConnectionRequest,
            crate::handlers::types::PaginatedResponse<crate::handlers::connections::ConnectionInfo>,
            crate::handlers::types::PaginatedResponse<crate::handlers::records::RecordInfo>,
            crate::handlers::sync::SyncStateInfo,
            crate::handlers::records::RecordInfo,
            crate::handlers::providers::ProvidersResponse,
            crate::providers::ProviderDescriptor,
            crate::handlers::webhooks::WebhookAcceptResponse,
        )
    ),
    info(
        title = "Syncline API",
        description = "API for mirroring third-party provider state into local storage",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
