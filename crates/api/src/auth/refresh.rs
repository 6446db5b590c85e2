//! Refresh-token persistence.
//!
//! Refresh tokens are long-lived and never rotated: the same token mints
//! new access tokens until it expires or is revoked. Revocation flips
//! `is_revoked` rather than deleting, so the revoke-all path is a single
//! UPDATE and the cleanup sweep can still account for the rows.

use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::expiry::{format_expires_at, parse_expires_at};
use crate::error::ApiResult;

#[derive(Debug, FromRow)]
pub struct RefreshTokenRow {
    pub id: i64,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: String,
    pub is_revoked: bool,
}

/// Store a freshly minted refresh token.
pub async fn save_refresh_token(
    pool: &PgPool,
    user_id: Uuid,
    token: &str,
    expires_at: OffsetDateTime,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, token, expires_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(user_id)
    .bind(token)
    .bind(format_expires_at(expires_at))
    .execute(pool)
    .await?;

    tracing::info!(user_id = %user_id, "Refresh token created");
    Ok(())
}

/// Fetch a refresh-token row by its exact token value.
pub async fn get_by_token(pool: &PgPool, token: &str) -> ApiResult<Option<RefreshTokenRow>> {
    let row = sqlx::query_as::<_, RefreshTokenRow>(
        r#"
        SELECT id, user_id, token, expires_at, is_revoked
        FROM refresh_tokens
        WHERE token = $1
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Delete a refresh-token row (used when a token is found expired).
pub async fn delete_by_token(pool: &PgPool, token: &str) -> ApiResult<bool> {
    let rows_affected = sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
        .bind(token)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(rows_affected > 0)
}

/// Mark every refresh token belonging to a user as revoked. Sessions are
/// untouched: outstanding access tokens remain valid until their own
/// session rows expire.
pub async fn revoke_all_for_user(pool: &PgPool, user_id: Uuid) -> ApiResult<u64> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE refresh_tokens
        SET is_revoked = TRUE
        WHERE user_id = $1
          AND is_revoked = FALSE
        "#,
    )
    .bind(user_id)
    .execute(pool)
    .await?
    .rows_affected();

    tracing::info!(user_id = %user_id, revoked = rows_affected, "Revoked all refresh tokens");
    Ok(rows_affected)
}

/// Sweep expired refresh tokens. Rows with unparsable expiries are kept
/// and logged. Returns the number of rows deleted.
pub async fn cleanup_expired(pool: &PgPool) -> ApiResult<u64> {
    let now = OffsetDateTime::now_utc();
    let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, expires_at FROM refresh_tokens")
        .fetch_all(pool)
        .await?;

    let mut cleaned: u64 = 0;
    for (id, raw) in rows {
        match parse_expires_at(&raw) {
            Ok(expires_at) if now > expires_at => {
                sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
                    .bind(id)
                    .execute(pool)
                    .await?;
                cleaned += 1;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(refresh_token_id = id, error = %e, "Unparsable refresh expiry, keeping row");
            }
        }
    }

    tracing::info!(deleted = cleaned, "Refresh token cleanup sweep complete");
    Ok(cleaned)
}
