//! Database migration runner

use crate::config::Config;
use anyhow::{Context, Result};
use sqlx::mysql::MySqlPoolOptions;
use tracing::info;

/// Run database migrations
pub async fn run_migrations(config: &Config) -> Result<()> {
    info!("Connecting to database...");

    let pool = MySqlPoolOptions::new()
        .max_connections(1)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    info!("Running database migrations...");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    info!("Database migrations completed");
    Ok(())
}
