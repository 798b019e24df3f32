//! Database pool construction and migrations.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;
use crate::errors::ConveyorResult;

pub mod migrator;

/// Build a connection pool from configuration
pub async fn connect(config: &DatabaseConfig) -> ConveyorResult<PgPool> {
    let url = config.effective_url()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&url)
        .await?;
    Ok(pool)
}

/// Run pending migrations
pub async fn migrate(pool: &PgPool) -> ConveyorResult<()> {
    migrator::MIGRATOR
        .run(pool)
        .await
        .map_err(sqlx::Error::from)?;
    Ok(())
}
