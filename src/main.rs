//! Authgate - CLI Entry Point
//!
//! Commands:
//!   serve      - Start the API server (default)
//!   migrate    - Run database migrations only
//!   sweep-logs - Run one activity-log retention sweep and exit

use anyhow::Result;
use authgate::{config::Config, migration, server, telemetry};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "authgate")]
#[command(about = "Authgate authentication service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve,
    /// Run database migrations only
    Migrate,
    /// Run a single activity-log retention sweep and exit
    SweepLogs,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (telemetry init needs config)
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let prometheus_handle = telemetry::init(&config.telemetry);

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Migrate) => {
            info!("Running database migrations...");
            migration::run_migrations(&config).await?;
            info!("Migrations completed successfully");
        }
        Some(Commands::SweepLogs) => {
            info!("Running activity log sweep...");
            let deleted = server::sweep_activity_logs(&config).await?;
            info!(deleted, "Activity log sweep completed");
        }
        Some(Commands::Serve) | None => {
            info!("Starting Authgate service");
            info!("HTTP server listening on {}", config.http_addr());
            server::run(config, prometheus_handle).await?;
        }
    }

    Ok(())
}
