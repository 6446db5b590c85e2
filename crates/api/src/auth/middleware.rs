//! Authentication middleware for Axum.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::auth::service::AuthService;
use crate::error::ApiError;

/// Authenticated principal attached to the request after `require_auth`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_permanent_admin: bool,
    /// Role from the access-token claims.
    pub role: String,
    /// resource type → permissions, from the access-token claims.
    pub permissions: HashMap<String, Vec<String>>,
}

/// The exact bearer token the request carried. Handlers that operate on
/// the session ledger (logout, verify-token) need it verbatim.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// State needed for authentication.
#[derive(Clone)]
pub struct AuthState {
    pub service: AuthService,
    pub pool: PgPool,
}

/// Extract the bearer token from the Authorization header.
pub fn extract_bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(String::from)
}

/// Middleware that requires a valid access token backed by a live
/// session row.
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = extract_bearer_token(&request) else {
        tracing::warn!(path = %path, "require_auth: missing bearer token");
        return ApiError::Unauthorized.into_response();
    };

    let claims = match auth_state.service.verify_access(&token).await {
        Ok(Some(claims)) => claims,
        Ok(None) => {
            tracing::warn!(path = %path, "require_auth: token invalid or session revoked");
            return ApiError::Unauthorized.into_response();
        }
        Err(e) => {
            tracing::error!(path = %path, error = ?e, "require_auth: verification failed");
            return e.into_response();
        }
    };

    let user = match auth_state.service.get_user_by_id(claims.sub).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::warn!(path = %path, user_id = %claims.sub, "require_auth: user not found");
            return ApiError::Unauthorized.into_response();
        }
        Err(e) => return e.into_response(),
    };

    if !user.is_active {
        tracing::warn!(path = %path, user_id = %user.id, "require_auth: inactive user");
        return ApiError::Unauthorized.into_response();
    }

    let auth_user = AuthUser {
        id: user.id,
        username: user.username,
        email: user.email,
        is_permanent_admin: user.is_permanent_admin,
        role: claims.role,
        permissions: claims.permissions,
    };

    request.extensions_mut().insert(auth_user);
    request.extensions_mut().insert(BearerToken(token));
    next.run(request).await
}

/// Middleware requiring the admin role. Layered after `require_auth`;
/// reads the current role from storage so a demotion takes effect before
/// the token expires.
pub async fn require_admin(
    State(auth_state): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(auth_user) = request.extensions().get::<AuthUser>().cloned() else {
        return ApiError::Unauthorized.into_response();
    };

    if auth_user.is_permanent_admin {
        return next.run(request).await;
    }

    let role: Result<Option<String>, sqlx::Error> =
        sqlx::query_scalar("SELECT role FROM user_permissions WHERE user_id = $1")
            .bind(auth_user.id)
            .fetch_optional(&auth_state.pool)
            .await;

    match role {
        Ok(Some(role)) if role == "admin" => next.run(request).await,
        Ok(_) => {
            tracing::warn!(user_id = %auth_user.id, "Unauthorized admin access attempt");
            ApiError::Forbidden.into_response()
        }
        Err(e) => {
            tracing::error!(user_id = %auth_user.id, error = %e, "Admin role lookup failed");
            ApiError::Internal.into_response()
        }
    }
}
