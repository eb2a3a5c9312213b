//! Database pool construction and health checks.
//!
//! Postgres is the production backend; SQLite serves tests and local
//! experiments. Both run through the same SeaORM pool options.

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;

const CONNECT_ATTEMPTS: u32 = 5;
const FIRST_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Errors raised while building the connection pool.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Builds the SeaORM pool from config, retrying transient connect failures
/// with exponential backoff.
///
/// # Examples
///
/// ```no_run
/// use syncline::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::default();
///     let db = init_pool(&config).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut options = ConnectOptions::new(&cfg.database_url);
    options
        .max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let mut delay = FIRST_RETRY_DELAY;
    for attempt in 1..CONNECT_ATTEMPTS {
        match Database::connect(options.clone()).await {
            Ok(pool) => {
                tracing::info!(attempt, "connected to database");
                return Ok(pool);
            }
            Err(err) => {
                tracing::warn!(
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "database connection failed; retrying"
                );
                sleep(delay).await;
                delay *= 2;
            }
        }
    }

    // Last attempt surfaces the error instead of sleeping again.
    let pool = Database::connect(options).await.map_err(|err| {
        tracing::error!(
            attempts = CONNECT_ATTEMPTS,
            error = %err,
            "giving up on database connection"
        );
        DatabaseError::ConnectionFailed { source: err }
    })?;
    tracing::info!(attempt = CONNECT_ATTEMPTS, "connected to database");
    Ok(pool)
}

/// `SELECT 1` against the pool; readiness probes report 503 when this fails.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let probe = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(probe)
        .await
        .context("Database health check failed")?;
    Ok(())
}
