//! Periodic cleanup of expired sessions and refresh tokens.

use std::time::Duration;

use sqlx::PgPool;

use crate::auth::{refresh, sessions};

/// Run the cleanup sweeps on a fixed interval, forever. A failed sweep
/// logs and the task keeps going; both sweeps are idempotent and safe to
/// run alongside live request processing.
pub async fn cleanup_task(pool: PgPool, interval_seconds: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));

    loop {
        interval.tick().await;
        run_sweeps(&pool).await;
    }
}

/// One cleanup pass over both stores.
pub async fn run_sweeps(pool: &PgPool) {
    tracing::info!("Running periodic session cleanup");

    let sessions_cleaned = match sessions::cleanup_expired_sessions(pool).await {
        Ok(count) => count,
        Err(e) => {
            tracing::error!(error = ?e, "Session cleanup sweep failed");
            0
        }
    };

    let refresh_cleaned = match refresh::cleanup_expired(pool).await {
        Ok(count) => count,
        Err(e) => {
            tracing::error!(error = ?e, "Refresh token cleanup sweep failed");
            0
        }
    };

    if sessions_cleaned > 0 || refresh_cleaned > 0 {
        tracing::info!(
            sessions = sessions_cleaned,
            refresh_tokens = refresh_cleaned,
            "Periodic cleanup removed expired rows"
        );
    } else {
        tracing::info!("Periodic cleanup found nothing to remove");
    }
}
