//! Application state

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use opsflow_executor::StepExecutor;
use sqlx::PgPool;

use crate::auth::{AuthService, AuthState, JwtManager};
use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub auth: AuthService,
    pub executor: StepExecutor,
    /// Number of currently connected token-monitor clients.
    pub ws_connections: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret);
        let auth = AuthService::new(
            pool.clone(),
            jwt_manager,
            config.access_token_lifetime(),
            config.refresh_token_lifetime(),
        );
        tracing::info!(
            access_minutes = config.access_token_expire_minutes,
            refresh_days = config.refresh_token_expire_days,
            "Auth service initialized"
        );

        let executor = StepExecutor::new(pool.clone());
        tracing::info!("Step executor initialized");

        Self {
            pool,
            config,
            auth,
            executor,
            ws_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            service: self.auth.clone(),
            pool: self.pool.clone(),
        }
    }
}
