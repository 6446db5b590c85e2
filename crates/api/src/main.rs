//! Opsflow API Server
//!
//! The main API server for Opsflow, providing authentication, role-based
//! authorization, workflow management, and sandboxed step execution.

use std::net::SocketAddr;

use axum::http::{header, Method};
use opsflow_shared::{create_migration_pool, create_pool, run_migrations};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opsflow_api::routes::create_router;
use opsflow_api::{authz, cleanup, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,opsflow_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Opsflow API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    // Run migrations on a dedicated single-connection pool.
    tracing::info!("Running database migrations...");
    let migration_pool = create_migration_pool(&config.database_url).await?;
    run_migrations(&migration_pool).await?;
    migration_pool.close().await;

    // Seed the role-permission matrix and restore the admin invariant.
    authz::seed_and_reconcile_role_permissions(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("role permission reconciliation failed: {e}"))?;

    // Create application state
    let state = AppState::new(pool.clone(), config.clone());

    // Start the periodic cleanup task for expired sessions and refresh
    // tokens.
    tokio::spawn(cleanup::cleanup_task(
        pool.clone(),
        config.cleanup_interval_seconds,
    ));
    tracing::info!(
        interval_seconds = config.cleanup_interval_seconds,
        "Cleanup task started"
    );

    // Build CORS layer - restrict to allowed origins only
    let allowed_origins: Vec<axum::http::HeaderValue> = config
        .allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    tracing::info!(
        "CORS configured with {} allowed origins",
        allowed_origins.len()
    );

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::ORIGIN,
        ])
        .allow_credentials(true);

    // Build the router
    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Parse bind address
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    // Start the server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
