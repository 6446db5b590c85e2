//! Authentication routes.

use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::sessions;
use crate::auth::{AuthOutcome, AuthUser, BearerToken, TokenPair};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Threshold under which clients should refresh proactively.
const REFRESH_THRESHOLD_SECONDS: i64 = 30;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct EditUsernameRequest {
    pub new_username: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAccountRequest {
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RequestPasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct HardResetPasswordRequest {
    pub token: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Rough email shape check used to route the login lookup.
fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

// =============================================================================
// Handlers
// =============================================================================

/// `POST /auth/register`
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Json<Value>> {
    let outcome = state
        .auth
        .register(&request.username, &request.email, &request.password)
        .await?;

    Ok(Json(json!({
        "message": "User registered successfully",
        "is_first_user": outcome.is_first_user,
    })))
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<TokenPair>> {
    let outcome = if looks_like_email(&request.username_or_email) {
        state
            .auth
            .authenticate_by_email(&request.username_or_email, &request.password)
            .await?
    } else {
        state
            .auth
            .authenticate_by_username(&request.username_or_email, &request.password)
            .await?
    };

    let user = match outcome {
        AuthOutcome::Success(user) => user,
        AuthOutcome::InactiveUser => {
            return Err(ApiError::Authentication(
                "Account is inactive - please contact an administrator".to_string(),
            ));
        }
        AuthOutcome::InvalidCredentials => {
            return Err(ApiError::Authentication("Invalid credentials".to_string()));
        }
    };

    let tokens = state.auth.login(&user).await?;
    Ok(Json(tokens))
}

/// `POST /auth/refresh-token` (auth required)
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(request): Json<RefreshTokenRequest>,
) -> ApiResult<Json<TokenPair>> {
    let tokens = state
        .auth
        .refresh_access(&request.refresh_token)
        .await?
        .ok_or_else(|| {
            ApiError::Authentication("Invalid or expired refresh token".to_string())
        })?;

    Ok(Json(tokens))
}

/// `POST /auth/logout`
pub async fn logout(
    State(state): State<AppState>,
    Extension(token): Extension<BearerToken>,
) -> ApiResult<Json<Value>> {
    let removed = state.auth.logout(&token.0).await?;
    if !removed {
        return Err(ApiError::Validation(
            "Logout failed or session not found".to_string(),
        ));
    }
    Ok(Json(json!({ "message": "Logged out successfully" })))
}

/// `POST /auth/logout-all-devices`
///
/// Revokes every refresh token. Outstanding access tokens stay valid
/// until their session rows expire.
pub async fn logout_all_devices(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Value>> {
    state.auth.revoke_all_refresh(auth_user.id).await?;
    Ok(Json(json!({ "message": "Logged out from all devices" })))
}

/// `GET /auth/verify-token`
pub async fn verify_token(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Extension(token): Extension<BearerToken>,
) -> ApiResult<Json<Value>> {
    let Some(info) = sessions::session_info_for_token(&state.pool, &token.0).await? else {
        return Ok(Json(json!({
            "valid": false,
            "error": "Token not found or invalid",
            "should_refresh": false,
            "time_remaining_seconds": 0,
        })));
    };

    let should_refresh = info.time_remaining_seconds <= REFRESH_THRESHOLD_SECONDS;
    Ok(Json(json!({
        "valid": true,
        "user": {
            "id": auth_user.id,
            "username": auth_user.username,
            "email": auth_user.email,
            "role": auth_user.role,
        },
        "expires_at": info.expires_at,
        "time_remaining_seconds": info.time_remaining_seconds,
        "should_refresh": should_refresh,
        "refresh_threshold_seconds": REFRESH_THRESHOLD_SECONDS,
    })))
}

/// `GET /auth/me`
pub async fn me(Extension(auth_user): Extension<AuthUser>) -> Json<Value> {
    Json(json!({
        "id": auth_user.id,
        "username": auth_user.username,
        "email": auth_user.email,
        "role": auth_user.role,
        "permissions": auth_user.permissions,
        "is_permanent_admin": auth_user.is_permanent_admin,
    }))
}

/// `POST /auth/change-password`
pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<ChangePasswordRequest>,
) -> ApiResult<Json<Value>> {
    state
        .auth
        .change_password(
            auth_user.id,
            &request.current_password,
            &request.new_password,
            &request.confirm_password,
        )
        .await?;
    Ok(Json(json!({ "message": "Password updated successfully" })))
}

/// `PUT /auth/edit-username`
pub async fn edit_username(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<EditUsernameRequest>,
) -> ApiResult<Json<Value>> {
    state
        .auth
        .edit_username(auth_user.id, &request.new_username)
        .await?;
    Ok(Json(json!({ "message": "Username updated successfully" })))
}

/// `DELETE /auth/delete-account`
///
/// Admins must re-present their password; for other users it is
/// verified only when supplied.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<DeleteAccountRequest>,
) -> ApiResult<Json<Value>> {
    let require_password = auth_user.is_permanent_admin || auth_user.role == "admin";
    state
        .auth
        .delete_account(auth_user.id, request.password.as_deref(), require_password)
        .await?;
    Ok(Json(json!({ "message": "User account deleted successfully" })))
}

/// `POST /auth/request-password-reset`
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(request): Json<RequestPasswordResetRequest>,
) -> ApiResult<Json<Value>> {
    state.auth.request_password_reset(&request.email).await?;
    Ok(Json(json!({
        "message": "Password reset link sent to email"
    })))
}

/// `POST /auth/hard-reset-password`
pub async fn hard_reset_password(
    State(state): State<AppState>,
    Json(request): Json<HardResetPasswordRequest>,
) -> ApiResult<Json<Value>> {
    state
        .auth
        .hard_reset_password(&request.token, &request.new_password, &request.confirm_password)
        .await?;
    Ok(Json(json!({ "message": "Password reset successfully" })))
}

/// `GET /auth/check-first-user`
pub async fn check_first_user(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let count = state.auth.user_count().await?;
    Ok(Json(json!({ "is_first_user": count == 0 })))
}

/// `GET /auth/check-availability?username=|email=`
pub async fn check_availability(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> ApiResult<Json<Value>> {
    if let Some(username) = query.username.as_deref() {
        let available = state.auth.username_available(username).await?;
        return Ok(Json(json!({ "available": available })));
    }
    if let Some(email) = query.email.as_deref() {
        let available = state.auth.email_available(email).await?;
        return Ok(Json(json!({ "available": available })));
    }
    Err(ApiError::Validation(
        "Must provide username or email".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_detection() {
        assert!(looks_like_email("alice@example.com"));
        assert!(looks_like_email("a.b+c@sub.example.org"));
        assert!(!looks_like_email("alice"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("alice@nodot"));
        assert!(!looks_like_email("alice@.com"));
    }
}
