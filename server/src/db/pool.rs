//! Postgres pool setup and schema migrations.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;

pub type Pool = PgPool;

/// Connect to `config.database_url`, sized by `config.db_max_connections`.
pub async fn create_pool(config: &Config) -> Result<Pool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;
    tracing::debug!(max_connections = config.db_max_connections, "Connected to Postgres");
    Ok(pool)
}

/// Apply the embedded migrations in `server/migrations`.
pub async fn run_migrations(pool: &Pool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
