//! Credential and token lifecycle service.
//!
//! Owns registration, authentication, token minting and verification,
//! and the password maintenance flows. Every token the service mints is
//! also recorded server-side: access tokens in `user_sessions` (the
//! revocation ledger), refresh tokens in `refresh_tokens`.

use std::collections::HashMap;

use rand::RngCore;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::expiry::{format_expires_at, parse_expires_at};
use crate::auth::jwt::{AccessClaims, JwtManager};
use crate::auth::{password, refresh, sessions};
use crate::authz::{self, Role};
use crate::error::{ApiError, ApiResult};

/// Password-reset tokens live for one hour.
const RESET_TOKEN_LIFETIME: time::Duration = time::Duration::hours(1);

/// Public view of a user, embedded in token responses.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub is_permanent_admin: bool,
}

/// Outcome of an authentication attempt.
#[derive(Debug)]
pub enum AuthOutcome {
    Success(UserSummary),
    /// The user exists but the account is deactivated.
    InactiveUser,
    /// Unknown user or wrong password; callers must not distinguish.
    InvalidCredentials,
}

#[derive(Debug, Serialize)]
pub struct RegisterOutcome {
    pub user_id: Uuid,
    pub is_first_user: bool,
}

/// Access/refresh pair handed out at login and refresh.
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub user: UserSummary,
}

#[derive(Clone)]
pub struct AuthService {
    pool: PgPool,
    jwt: JwtManager,
    access_lifetime: time::Duration,
    refresh_lifetime: time::Duration,
}

impl AuthService {
    pub fn new(
        pool: PgPool,
        jwt: JwtManager,
        access_lifetime: time::Duration,
        refresh_lifetime: time::Duration,
    ) -> Self {
        Self {
            pool,
            jwt,
            access_lifetime,
            refresh_lifetime,
        }
    }

    pub fn jwt(&self) -> &JwtManager {
        &self.jwt
    }

    // =========================================================================
    // Registration & authentication
    // =========================================================================

    /// Register a new user. The first user ever registered becomes a
    /// permanent admin and receives the admin role.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        plain_password: &str,
    ) -> ApiResult<RegisterOutcome> {
        if username.trim().is_empty() || email.trim().is_empty() {
            return Err(ApiError::Validation(
                "Username and email are required".to_string(),
            ));
        }
        password::validate_password_strength(plain_password)
            .map_err(|e| ApiError::Validation(e.to_string()))?;

        let existing: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM users WHERE username = $1 OR email = $2")
                .bind(username)
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(ApiError::Conflict(
                "Username or email already exists".to_string(),
            ));
        }

        let user_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        let is_first_user = user_count == 0;

        let password_hash =
            password::hash_password(plain_password).map_err(|_| ApiError::Internal)?;
        let user_id = Uuid::new_v4();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, is_active, is_permanent_admin)
            VALUES ($1, $2, $3, $4, TRUE, $5)
            "#,
        )
        .bind(user_id)
        .bind(username)
        .bind(email)
        .bind(&password_hash)
        .bind(is_first_user)
        .execute(&mut *tx)
        .await?;

        if is_first_user {
            sqlx::query("INSERT INTO user_permissions (user_id, role) VALUES ($1, 'admin')")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            is_first_user = is_first_user,
            "User registered"
        );
        Ok(RegisterOutcome {
            user_id,
            is_first_user,
        })
    }

    /// Authenticate by username. Includes inactive users in the lookup so
    /// the caller can return the explicit inactive-account message.
    pub async fn authenticate_by_username(
        &self,
        username: &str,
        plain_password: &str,
    ) -> ApiResult<AuthOutcome> {
        let user = self
            .fetch_user_with_hash("SELECT id, username, email, password_hash, is_active, is_permanent_admin FROM users WHERE username = $1", username)
            .await?;
        self.check_credentials(user, plain_password)
    }

    /// Authenticate by email, same contract as by username.
    pub async fn authenticate_by_email(
        &self,
        email: &str,
        plain_password: &str,
    ) -> ApiResult<AuthOutcome> {
        let user = self
            .fetch_user_with_hash("SELECT id, username, email, password_hash, is_active, is_permanent_admin FROM users WHERE email = $1", email)
            .await?;
        self.check_credentials(user, plain_password)
    }

    async fn fetch_user_with_hash(
        &self,
        query: &str,
        key: &str,
    ) -> ApiResult<Option<UserWithHashRow>> {
        let row = sqlx::query_as::<_, UserWithHashRow>(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    fn check_credentials(
        &self,
        user: Option<UserWithHashRow>,
        plain_password: &str,
    ) -> ApiResult<AuthOutcome> {
        let Some(user) = user else {
            // Keep unknown-user timing aligned with a real verification.
            password::burn_verification(plain_password);
            return Ok(AuthOutcome::InvalidCredentials);
        };

        if !user.is_active {
            return Ok(AuthOutcome::InactiveUser);
        }

        if !password::verify_password(plain_password, &user.password_hash) {
            return Ok(AuthOutcome::InvalidCredentials);
        }

        Ok(AuthOutcome::Success(user.into_summary()))
    }

    // =========================================================================
    // Token minting & verification
    // =========================================================================

    /// Mint an access/refresh pair for an authenticated user and record
    /// both server-side.
    pub async fn login(&self, user: &UserSummary) -> ApiResult<TokenPair> {
        let (role, permissions) = self.resolve_role_and_permissions(user.id).await?;

        let (access_token, access_expires) = self
            .jwt
            .generate_access_token(
                user.id,
                role.as_str(),
                permissions.clone(),
                user.is_permanent_admin,
                self.access_lifetime,
            )
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to mint access token");
                ApiError::Internal
            })?;
        sessions::save_session(&self.pool, user.id, &access_token, access_expires).await?;

        let (refresh_token, refresh_expires) = self
            .jwt
            .generate_refresh_token(user.id, self.refresh_lifetime)
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to mint refresh token");
                ApiError::Internal
            })?;
        refresh::save_refresh_token(&self.pool, user.id, &refresh_token, refresh_expires).await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "bearer",
            user: user.clone(),
        })
    }

    /// Resolve the role (defaulting to viewer) and the grouped permission
    /// map minted into access claims. Falls back to the built-in defaults
    /// when the table yields nothing for the role.
    async fn resolve_role_and_permissions(
        &self,
        user_id: Uuid,
    ) -> ApiResult<(Role, HashMap<String, Vec<String>>)> {
        let role_raw: Option<String> =
            sqlx::query_scalar("SELECT role FROM user_permissions WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        let role = role_raw
            .as_deref()
            .and_then(|r| r.parse::<Role>().ok())
            .unwrap_or(Role::Viewer);

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT permission, resource_type
            FROM role_permissions
            WHERE role = $1
            ORDER BY resource_type, permission
            "#,
        )
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut permissions: HashMap<String, Vec<String>> = HashMap::new();
        for (permission, resource_type) in rows {
            permissions.entry(resource_type).or_default().push(permission);
        }

        if permissions.is_empty() {
            tracing::warn!(
                role = role.as_str(),
                "No role permissions found in storage, using built-in defaults"
            );
            permissions = authz::default_claim_permissions(role);
        }

        Ok((role, permissions))
    }

    /// Verify an access token: signature and expiry, then the session
    /// ledger. Returns the claims only when both agree.
    pub async fn verify_access(&self, token: &str) -> ApiResult<Option<AccessClaims>> {
        let Ok(claims) = self.jwt.decode_access(token) else {
            return Ok(None);
        };

        if !sessions::is_session_live(&self.pool, token).await? {
            return Ok(None);
        }

        Ok(Some(claims))
    }

    /// Mint a new access token from a refresh token. The refresh token is
    /// reused, never rotated. Rejected when the row is missing, revoked,
    /// expired, or the user is inactive.
    pub async fn refresh_access(&self, refresh_token: &str) -> ApiResult<Option<TokenPair>> {
        let Ok(claims) = self.jwt.decode_refresh(refresh_token) else {
            tracing::warn!("Refresh rejected: invalid refresh JWT");
            return Ok(None);
        };

        let Some(row) = refresh::get_by_token(&self.pool, refresh_token).await? else {
            tracing::warn!("Refresh rejected: token not found in storage");
            return Ok(None);
        };

        if row.is_revoked {
            tracing::warn!(user_id = %row.user_id, "Refresh rejected: token revoked");
            return Ok(None);
        }

        match parse_expires_at(&row.expires_at) {
            Ok(expires_at) => {
                if OffsetDateTime::now_utc() > expires_at {
                    tracing::warn!(user_id = %row.user_id, "Refresh rejected: token expired");
                    refresh::delete_by_token(&self.pool, refresh_token).await?;
                    return Ok(None);
                }
            }
            Err(e) => {
                tracing::error!(user_id = %row.user_id, error = %e, "Refresh rejected: unparsable expiry");
                return Ok(None);
            }
        }

        let Some(user) = self.get_user_by_id(claims.sub).await? else {
            return Ok(None);
        };
        if !user.is_active {
            tracing::warn!(user_id = %user.id, "Refresh rejected: inactive user");
            return Ok(None);
        }

        let (role, permissions) = self.resolve_role_and_permissions(user.id).await?;
        let (access_token, access_expires) = self
            .jwt
            .generate_access_token(
                user.id,
                role.as_str(),
                permissions,
                user.is_permanent_admin,
                self.access_lifetime,
            )
            .map_err(|_| ApiError::Internal)?;
        sessions::save_session(&self.pool, user.id, &access_token, access_expires).await?;

        Ok(Some(TokenPair {
            access_token,
            refresh_token: refresh_token.to_string(),
            token_type: "bearer",
            user,
        }))
    }

    /// Delete the session row for a token. Returns whether one existed.
    pub async fn logout(&self, token: &str) -> ApiResult<bool> {
        sessions::delete_by_token(&self.pool, token).await
    }

    /// Revoke every refresh token for a user. Outstanding access tokens
    /// keep working until their session rows expire — documented
    /// behavior of logout-all-devices.
    pub async fn revoke_all_refresh(&self, user_id: Uuid) -> ApiResult<u64> {
        refresh::revoke_all_for_user(&self.pool, user_id).await
    }

    // =========================================================================
    // User lookups
    // =========================================================================

    pub async fn get_user_by_id(&self, user_id: Uuid) -> ApiResult<Option<UserSummary>> {
        let user = sqlx::query_as::<_, UserSummary>(
            "SELECT id, username, email, is_active, is_permanent_admin FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn user_count(&self) -> ApiResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn username_available(&self, username: &str) -> ApiResult<bool> {
        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM users WHERE username = $1 AND is_active = TRUE",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(existing.is_none())
    }

    pub async fn email_available(&self, email: &str) -> ApiResult<bool> {
        let existing: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM users WHERE email = $1 AND is_active = TRUE")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(existing.is_none())
    }

    // =========================================================================
    // Account maintenance
    // =========================================================================

    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> ApiResult<()> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(stored) = stored else {
            return Err(ApiError::NotFound("User not found".to_string()));
        };

        if !password::verify_password(current_password, &stored) {
            return Err(ApiError::Validation(
                "Current password is incorrect".to_string(),
            ));
        }
        if new_password != confirm_password {
            return Err(ApiError::Validation(
                "New passwords do not match".to_string(),
            ));
        }
        password::validate_password_strength(new_password)
            .map_err(|e| ApiError::Validation(e.to_string()))?;

        let new_hash = password::hash_password(new_password).map_err(|_| ApiError::Internal)?;
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
            .bind(&new_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        tracing::info!(user_id = %user_id, "Password changed");
        Ok(())
    }

    pub async fn edit_username(&self, user_id: Uuid, new_username: &str) -> ApiResult<()> {
        if new_username.trim().is_empty() {
            return Err(ApiError::Validation("Username is required".to_string()));
        }

        let taken: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE username = $1")
            .bind(new_username)
            .fetch_optional(&self.pool)
            .await?;
        if taken.is_some() {
            return Err(ApiError::Conflict("Username already taken".to_string()));
        }

        sqlx::query("UPDATE users SET username = $1, updated_at = NOW() WHERE id = $2")
            .bind(new_username)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete the caller's account. Admin callers must re-present their
    /// password; for others it is optional but verified when given.
    pub async fn delete_account(
        &self,
        user_id: Uuid,
        plain_password: Option<&str>,
        require_password: bool,
    ) -> ApiResult<()> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(stored) = stored else {
            return Err(ApiError::NotFound("User not found".to_string()));
        };

        if require_password {
            let Some(given) = plain_password else {
                return Err(ApiError::Validation("Password is required".to_string()));
            };
            if !password::verify_password(given, &stored) {
                return Err(ApiError::Validation("Password is incorrect".to_string()));
            }
        }

        let rows_affected = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if rows_affected == 0 {
            return Err(ApiError::NotFound(
                "User not found or already deleted".to_string(),
            ));
        }

        tracing::info!(user_id = %user_id, "Account deleted");
        Ok(())
    }

    // =========================================================================
    // Password reset
    // =========================================================================

    /// Create a single-use reset token for the email. Delivery is an
    /// external collaborator; the link is logged for now.
    pub async fn request_password_reset(&self, email: &str) -> ApiResult<()> {
        let user: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM users WHERE email = $1 AND is_active = TRUE")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        if user.is_none() {
            return Err(ApiError::Validation(
                "User with this email does not exist".to_string(),
            ));
        }

        let mut token_bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut token_bytes);
        let token = hex::encode(token_bytes);
        let expires_at = OffsetDateTime::now_utc() + RESET_TOKEN_LIFETIME;

        sqlx::query(
            "INSERT INTO password_reset_tokens (email, token, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(email)
        .bind(&token)
        .bind(format_expires_at(expires_at))
        .execute(&self.pool)
        .await?;

        tracing::info!(reset_token = %token, "Password reset link issued");
        Ok(())
    }

    /// Consume a reset token and set the new password. The token is
    /// deleted on success; a second attempt fails validation.
    pub async fn hard_reset_password(
        &self,
        token: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> ApiResult<()> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT email, expires_at FROM password_reset_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        let Some((email, raw_expiry)) = row else {
            return Err(ApiError::Validation("Invalid or expired token".to_string()));
        };

        let expires_at = parse_expires_at(&raw_expiry)
            .map_err(|_| ApiError::Validation("Invalid or expired token".to_string()))?;
        if OffsetDateTime::now_utc() > expires_at {
            return Err(ApiError::Validation("Token has expired".to_string()));
        }

        if new_password != confirm_password {
            return Err(ApiError::Validation(
                "New passwords do not match".to_string(),
            ));
        }
        password::validate_password_strength(new_password)
            .map_err(|e| ApiError::Validation(e.to_string()))?;

        let new_hash = password::hash_password(new_password).map_err(|_| ApiError::Internal)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE email = $2")
            .bind(&new_hash)
            .bind(&email)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM password_reset_tokens WHERE token = $1")
            .bind(token)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(email = %email, "Password reset completed");
        Ok(())
    }
}

/// Internal row carrying the stored hash; never leaves the service.
#[derive(Debug, FromRow)]
struct UserWithHashRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    is_active: bool,
    is_permanent_admin: bool,
}

impl UserWithHashRow {
    fn into_summary(self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username,
            email: self.email,
            is_active: self.is_active,
            is_permanent_admin: self.is_permanent_admin,
        }
    }
}
