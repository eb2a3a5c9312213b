//! # Syncline Service Entry Point
//!
//! Loads layered configuration, installs telemetry, and dispatches to the
//! requested subcommand. Running without a subcommand starts the server.

use anyhow::Context;
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use syncline::{config::ConfigLoader, db, server::run_server, telemetry};

#[derive(Parser)]
#[command(name = "syncline", version, about = "Mirrors third-party account state into local storage")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the background sync scheduler
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config);

    tracing::info!(profile = %config.profile, "Configuration loaded");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "Effective configuration");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config).await,
        Command::Migrate => {
            let db = db::init_pool(&config)
                .await
                .context("initializing database connection pool")?;
            Migrator::up(&db, None)
                .await
                .context("applying migrations")?;
            tracing::info!("Migrations applied");
            Ok(())
        }
    }
}
