//! User session management for access-token revocation.
//!
//! The JWT is a stateless claim; these rows are the revocation ledger.
//! Both must agree for a request to proceed, which buys immediate
//! revocation at the cost of one storage read per authenticated request.
//! Sessions are keyed by the exact token string.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::expiry::{format_expires_at, parse_expires_at};
use crate::error::ApiResult;

/// Save a new session row. Called immediately after minting an access
/// token.
pub async fn save_session(
    pool: &PgPool,
    user_id: Uuid,
    token: &str,
    expires_at: OffsetDateTime,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO user_sessions (user_id, session_token, expires_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(user_id)
    .bind(token)
    .bind(format_expires_at(expires_at))
    .execute(pool)
    .await?;

    tracing::info!(user_id = %user_id, expires_at = %format_expires_at(expires_at), "Session created");
    Ok(())
}

/// Delete the session row for a token. Returns whether a row existed.
pub async fn delete_by_token(pool: &PgPool, token: &str) -> ApiResult<bool> {
    let rows_affected = sqlx::query("DELETE FROM user_sessions WHERE session_token = $1")
        .bind(token)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(rows_affected > 0)
}

/// Check that a live session row exists for this exact token.
///
/// A row whose parsed expiry is past is deleted eagerly and reported as
/// absent. A row whose expiry cannot be parsed is treated as invalid for
/// the request but the row is kept — unknown encodings are never
/// silently cleaned.
pub async fn is_session_live(pool: &PgPool, token: &str) -> ApiResult<bool> {
    let raw: Option<String> =
        sqlx::query_scalar("SELECT expires_at FROM user_sessions WHERE session_token = $1")
            .bind(token)
            .fetch_optional(pool)
            .await?;

    let Some(raw) = raw else {
        return Ok(false);
    };

    let expires_at = match parse_expires_at(&raw) {
        Ok(at) => at,
        Err(e) => {
            tracing::error!(error = %e, "Session row has unparsable expiry, rejecting request");
            return Ok(false);
        }
    };

    if OffsetDateTime::now_utc() > expires_at {
        tracing::info!("Session expired, cleaning up token row");
        delete_by_token(pool, token).await?;
        return Ok(false);
    }

    Ok(true)
}

/// Expiry information for a specific session token.
#[derive(Debug, serde::Serialize)]
pub struct SessionInfo {
    pub user_id: Uuid,
    pub expires_at: String,
    pub time_remaining_seconds: i64,
    pub is_expired: bool,
}

/// Look up the session row for a token and compute its remaining
/// lifetime.
pub async fn session_info_for_token(pool: &PgPool, token: &str) -> ApiResult<Option<SessionInfo>> {
    let row: Option<(Uuid, String)> =
        sqlx::query_as("SELECT user_id, expires_at FROM user_sessions WHERE session_token = $1")
            .bind(token)
            .fetch_optional(pool)
            .await?;

    let Some((user_id, raw)) = row else {
        return Ok(None);
    };

    let expires_at = match parse_expires_at(&raw) {
        Ok(at) => at,
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Session row has unparsable expiry");
            return Ok(None);
        }
    };

    let remaining = (expires_at - OffsetDateTime::now_utc()).whole_seconds();
    Ok(Some(SessionInfo {
        user_id,
        expires_at: raw,
        time_remaining_seconds: remaining.max(0),
        is_expired: remaining <= 0,
    }))
}

/// Sweep expired sessions. Every row is parsed individually; rows with
/// unparsable expiries are kept. Returns the number of rows deleted.
pub async fn cleanup_expired_sessions(pool: &PgPool) -> ApiResult<u64> {
    let now = OffsetDateTime::now_utc();
    let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, expires_at FROM user_sessions")
        .fetch_all(pool)
        .await?;

    let total = rows.len();
    let mut cleaned: u64 = 0;
    let mut kept: u64 = 0;

    for (id, raw) in rows {
        match parse_expires_at(&raw) {
            Ok(expires_at) if now > expires_at => {
                sqlx::query("DELETE FROM user_sessions WHERE id = $1")
                    .bind(id)
                    .execute(pool)
                    .await?;
                cleaned += 1;
            }
            Ok(_) => kept += 1,
            Err(e) => {
                // Keep rows we cannot parse.
                tracing::error!(session_id = id, error = %e, "Unparsable session expiry, keeping row");
                kept += 1;
            }
        }
    }

    tracing::info!(
        total = total,
        deleted = cleaned,
        kept = kept,
        "Session cleanup sweep complete"
    );
    Ok(cleaned)
}
