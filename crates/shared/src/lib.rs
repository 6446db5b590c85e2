//! Opsflow Shared Library
//!
//! Database pool construction and schema migrations shared by the API
//! server and any auxiliary binaries.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create the main database connection pool.
///
/// Sized for request traffic; migration work should use
/// [`create_migration_pool`] instead.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!("Database pool created");
    Ok(pool)
}

/// Create a pool for running migrations.
///
/// Single connection with a long acquire timeout so DDL is never
/// interleaved across connections.
pub async fn create_migration_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run schema migrations. The DDL is idempotent, so this is safe to run
/// on every startup.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
