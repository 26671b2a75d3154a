//! Database connection management

use crate::config::DatabaseSettings;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Create a connection pool for `url`
pub async fn create_pool(url: &str, settings: &DatabaseSettings) -> Result<PgPool, sqlx::Error> {
    info!(
        url = %mask_password(url),
        max_connections = settings.max_connections,
        min_connections = settings.min_connections,
        "Creating database connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .connect(url)
        .await?;

    info!("Database connection pool ready");
    Ok(pool)
}

/// Apply the call session schema
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

/// Hide the password part of a connection URL
pub(crate) fn mask_password(url: &str) -> String {
    let authority_start = url.find("://").map(|i| i + 3).unwrap_or(0);
    if let Some(at_pos) = url[authority_start..].find('@').map(|i| i + authority_start) {
        if let Some(colon_pos) = url[authority_start..at_pos].find(':') {
            let mut masked = url.to_string();
            masked.replace_range(authority_start + colon_pos + 1..at_pos, "****");
            return masked;
        }
    }
    url.to_string()
}
