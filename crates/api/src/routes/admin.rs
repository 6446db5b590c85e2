//! Admin routes: user management, groups, role permissions.
//!
//! All routes here sit behind `require_auth` + `require_admin`. Writes
//! against the admin role's permission rows are rejected; the startup
//! reconciler would restore them anyway.

use std::collections::HashMap;
use std::str::FromStr;

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use serde_json::{json, Value};

use crate::auth::{hash_password, validate_password_strength, AuthUser};
use crate::authz::{self, Permission, Role, RESOURCE_TYPES};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::workflows::store;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub group_id: Option<Uuid>,
}

fn default_role() -> String {
    "viewer".to_string()
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserPermissionsRequest {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ActiveStatusRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct RolePermissionChange {
    pub role: String,
    pub permission: String,
    pub resource_type: String,
}

#[derive(Debug, Deserialize)]
pub struct GroupCreateRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GroupUpdateRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct AdminUserSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub is_permanent_admin: bool,
    pub role: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Serialize, FromRow)]
pub struct GroupRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Serialize, FromRow)]
pub struct GroupMemberRow {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
}

#[derive(Debug, FromRow)]
struct RolePermissionRow {
    role: String,
    permission: String,
    resource_type: String,
}

// =============================================================================
// Helpers
// =============================================================================

const USER_COLUMNS: &str = "u.id, u.username, u.email, u.is_active, u.is_permanent_admin, \
     up.role, u.created_at, u.updated_at";

fn validate_role(role: &str) -> ApiResult<Role> {
    Role::from_str(role)
}

fn validate_permission(permission: &str) -> ApiResult<Permission> {
    Permission::from_str(permission)
}

fn validate_resource_type(resource_type: &str) -> ApiResult<()> {
    if !RESOURCE_TYPES.contains(&resource_type) {
        return Err(ApiError::Validation(
            "Invalid resource type. Must be workflow, user, group, or system".to_string(),
        ));
    }
    Ok(())
}

/// Admin role rows are immutable through the API.
fn reject_admin_role(role: &str) -> ApiResult<()> {
    if role == "admin" {
        return Err(ApiError::Validation(
            "Cannot modify admin role permissions. Admin role has all permissions by default"
                .to_string(),
        ));
    }
    Ok(())
}

async fn fetch_user(state: &AppState, user_id: Uuid) -> ApiResult<AdminUserSummary> {
    let user = sqlx::query_as::<_, AdminUserSummary>(&format!(
        r#"
        SELECT {USER_COLUMNS}
        FROM users u
        LEFT JOIN user_permissions up ON up.user_id = u.id
        WHERE u.id = $1
        "#
    ))
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(user)
}

/// Set (or create) a user's role row.
async fn upsert_role(state: &AppState, user_id: Uuid, role: Role) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO user_permissions (user_id, role)
        VALUES ($1, $2)
        ON CONFLICT (user_id)
        DO UPDATE SET role = EXCLUDED.role, updated_at = NOW()
        "#,
    )
    .bind(user_id)
    .bind(role.as_str())
    .execute(&state.pool)
    .await?;
    Ok(())
}

/// Guards shared by every role mutation: no self-changes, and permanent
/// admins can never be downgraded.
fn check_role_change(
    actor: &AuthUser,
    target: &AdminUserSummary,
    new_role: Role,
) -> ApiResult<()> {
    if actor.id == target.id {
        return Err(ApiError::Validation(
            "Users cannot change their own role".to_string(),
        ));
    }
    if target.is_permanent_admin && new_role != Role::Admin {
        return Err(ApiError::Validation(
            "Cannot downgrade a permanent admin".to_string(),
        ));
    }
    Ok(())
}

// =============================================================================
// User handlers
// =============================================================================

/// `GET /admin/users`
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> ApiResult<Json<Value>> {
    let sql = if query.include_inactive {
        format!(
            "SELECT {USER_COLUMNS} FROM users u \
             LEFT JOIN user_permissions up ON up.user_id = u.id \
             ORDER BY u.created_at"
        )
    } else {
        format!(
            "SELECT {USER_COLUMNS} FROM users u \
             LEFT JOIN user_permissions up ON up.user_id = u.id \
             WHERE u.is_active = TRUE ORDER BY u.created_at"
        )
    };

    let users = sqlx::query_as::<_, AdminUserSummary>(&sql)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(json!({
        "success": true,
        "count": users.len(),
        "users": users,
    })))
}

/// `GET /admin/users/{user_id}`
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let user = fetch_user(&state, user_id).await?;
    Ok(Json(json!({ "success": true, "user": user })))
}

/// `POST /admin/users`
pub async fn create_user(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let role = validate_role(&request.role)?;
    validate_password_strength(&request.password)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let existing: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM users WHERE username = $1 OR email = $2")
            .bind(&request.username)
            .bind(&request.email)
            .fetch_optional(&state.pool)
            .await?;
    if existing.is_some() {
        return Err(ApiError::Conflict(
            "Username or email already exists".to_string(),
        ));
    }

    let password_hash = hash_password(&request.password).map_err(|_| ApiError::Internal)?;
    let user_id = Uuid::new_v4();

    let mut tx = state.pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO users (id, username, email, password_hash, is_active, is_permanent_admin)
        VALUES ($1, $2, $3, $4, TRUE, FALSE)
        "#,
    )
    .bind(user_id)
    .bind(&request.username)
    .bind(&request.email)
    .bind(&password_hash)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO user_permissions (user_id, role) VALUES ($1, $2)")
        .bind(user_id)
        .bind(role.as_str())
        .execute(&mut *tx)
        .await?;

    if let Some(group_id) = request.group_id {
        sqlx::query(
            "INSERT INTO user_group_assignments (user_id, group_id) VALUES ($1, $2)",
        )
        .bind(user_id)
        .bind(group_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!(
        admin_id = %auth_user.id,
        user_id = %user_id,
        role = role.as_str(),
        "Admin created user"
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "user_id": user_id,
            "message": "User created successfully",
        })),
    ))
}

/// `DELETE /admin/users/{user_id}`
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    if auth_user.id == user_id {
        return Err(ApiError::Validation(
            "Use the delete-account endpoint to remove your own account".to_string(),
        ));
    }

    let target = fetch_user(&state, user_id).await?;
    if target.is_permanent_admin {
        return Err(ApiError::Validation(
            "Cannot delete a permanent admin".to_string(),
        ));
    }

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(&state.pool)
        .await?;

    tracing::info!(admin_id = %auth_user.id, user_id = %user_id, "Admin deleted user");
    Ok(Json(json!({ "success": true, "message": "User deleted" })))
}

/// `PATCH /admin/users/{user_id}/active-status`
pub async fn update_active_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<ActiveStatusRequest>,
) -> ApiResult<Json<Value>> {
    if auth_user.id == user_id {
        return Err(ApiError::Validation(
            "Users cannot change their own active status".to_string(),
        ));
    }
    fetch_user(&state, user_id).await?;

    sqlx::query("UPDATE users SET is_active = $2, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .bind(request.is_active)
        .execute(&state.pool)
        .await?;

    tracing::info!(
        admin_id = %auth_user.id,
        user_id = %user_id,
        is_active = request.is_active,
        "Admin changed user active status"
    );
    Ok(Json(json!({ "success": true, "is_active": request.is_active })))
}

/// `PUT /admin/users/{user_id}/permissions`
pub async fn update_user_permissions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<UpdateUserPermissionsRequest>,
) -> ApiResult<Json<Value>> {
    let target = fetch_user(&state, user_id).await?;

    if let Some(role_raw) = &request.role {
        let role = validate_role(role_raw)?;
        check_role_change(&auth_user, &target, role)?;
        upsert_role(&state, user_id, role).await?;
        tracing::info!(
            admin_id = %auth_user.id,
            user_id = %user_id,
            role = role.as_str(),
            "User role updated"
        );
    }

    if let Some(is_active) = request.is_active {
        if auth_user.id == user_id {
            return Err(ApiError::Validation(
                "Users cannot change their own active status".to_string(),
            ));
        }
        sqlx::query("UPDATE users SET is_active = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(is_active)
            .execute(&state.pool)
            .await?;
    }

    let user = fetch_user(&state, user_id).await?;
    Ok(Json(json!({ "success": true, "user": user })))
}

/// `GET /admin/users/{user_id}/permissions`
pub async fn get_user_role(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let user = fetch_user(&state, user_id).await?;
    let role = user.role.clone().unwrap_or_else(|| "viewer".to_string());

    let rows = sqlx::query_as::<_, RolePermissionRow>(
        "SELECT role, permission, resource_type FROM role_permissions WHERE role = $1",
    )
    .bind(&role)
    .fetch_all(&state.pool)
    .await?;

    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        grouped.entry(row.resource_type).or_default().push(row.permission);
    }

    Ok(Json(json!({
        "success": true,
        "user_id": user_id,
        "role": role,
        "is_permanent_admin": user.is_permanent_admin,
        "permissions": grouped,
    })))
}

/// `GET /admin/users/permissions/all`
pub async fn all_user_roles(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let rows: Vec<(Uuid, String)> =
        sqlx::query_as("SELECT user_id, role FROM user_permissions ORDER BY created_at")
            .fetch_all(&state.pool)
            .await?;

    let entries: Vec<Value> = rows
        .into_iter()
        .map(|(user_id, role)| json!({ "user_id": user_id, "role": role }))
        .collect();

    Ok(Json(json!({
        "success": true,
        "count": entries.len(),
        "user_roles": entries,
    })))
}

/// `POST /admin/users/{user_id}/elevate-admin`
///
/// Grants the admin role without the permanent flag: a temporary admin
/// that can be downgraded again.
pub async fn elevate_admin(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let target = fetch_user(&state, user_id).await?;
    check_role_change(&auth_user, &target, Role::Admin)?;

    upsert_role(&state, user_id, Role::Admin).await?;
    tracing::info!(admin_id = %auth_user.id, user_id = %user_id, "User elevated to temporary admin");
    Ok(Json(json!({
        "success": true,
        "message": "User elevated to admin",
        "is_permanent": target.is_permanent_admin,
    })))
}

/// `POST /admin/users/{user_id}/revoke-admin`
pub async fn revoke_admin(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let target = fetch_user(&state, user_id).await?;
    check_role_change(&auth_user, &target, Role::Viewer)?;

    upsert_role(&state, user_id, Role::Viewer).await?;
    tracing::info!(admin_id = %auth_user.id, user_id = %user_id, "Admin privileges revoked");
    Ok(Json(json!({
        "success": true,
        "message": "Admin privileges revoked, user is now a viewer",
    })))
}

/// `POST /admin/users/{user_id}/promote-permanent-admin`
///
/// One-way escalation: sets the permanent flag and the admin role. There
/// is no corresponding demotion.
pub async fn promote_permanent_admin(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let target = fetch_user(&state, user_id).await?;
    if auth_user.id == target.id {
        return Err(ApiError::Validation(
            "Users cannot change their own role".to_string(),
        ));
    }
    if target.is_permanent_admin {
        return Err(ApiError::Validation(
            "User is already a permanent admin".to_string(),
        ));
    }

    let mut tx = state.pool.begin().await?;
    sqlx::query("UPDATE users SET is_permanent_admin = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO user_permissions (user_id, role)
        VALUES ($1, 'admin')
        ON CONFLICT (user_id) DO UPDATE SET role = 'admin', updated_at = NOW()
        "#,
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(admin_id = %auth_user.id, user_id = %user_id, "User promoted to permanent admin");
    Ok(Json(json!({
        "success": true,
        "message": "User promoted to permanent admin",
    })))
}

/// `GET /admin/users/stats`
pub async fn user_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&state.pool)
        .await?;
    let active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active = TRUE")
        .fetch_one(&state.pool)
        .await?;
    let permanent_admins: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_permanent_admin = TRUE")
            .fetch_one(&state.pool)
            .await?;

    let role_rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT role, COUNT(*) FROM user_permissions GROUP BY role")
            .fetch_all(&state.pool)
            .await?;
    let users_by_role: HashMap<String, i64> = role_rows.into_iter().collect();

    Ok(Json(json!({
        "success": true,
        "total_users": total,
        "active_users": active,
        "permanent_admins": permanent_admins,
        "users_by_role": users_by_role,
    })))
}

// =============================================================================
// Group handlers
// =============================================================================

/// `POST /admin/groups`
pub async fn create_group(
    State(state): State<AppState>,
    Json(request): Json<GroupCreateRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Group name is required".to_string()));
    }

    let existing: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM user_groups WHERE name = $1")
        .bind(name)
        .fetch_optional(&state.pool)
        .await?;
    if existing.is_some() {
        return Err(ApiError::Conflict("Group name already exists".to_string()));
    }

    let group = sqlx::query_as::<_, GroupRow>(
        r#"
        INSERT INTO user_groups (id, name, description)
        VALUES ($1, $2, $3)
        RETURNING id, name, description, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(&request.description)
    .fetch_one(&state.pool)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "group": group })),
    ))
}

/// `GET /admin/groups`
pub async fn list_groups(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let groups = sqlx::query_as::<_, GroupRow>(
        "SELECT id, name, description, created_at, updated_at FROM user_groups ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "count": groups.len(),
        "groups": groups,
    })))
}

/// `GET /admin/groups/{group_id}`
pub async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let group = sqlx::query_as::<_, GroupRow>(
        "SELECT id, name, description, created_at, updated_at FROM user_groups WHERE id = $1",
    )
    .bind(group_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("Group not found".to_string()))?;

    let members = group_member_rows(&state, group_id).await?;
    let member_count = members.len();

    Ok(Json(json!({
        "success": true,
        "group": group,
        "members": members,
        "member_count": member_count,
    })))
}

/// `PUT /admin/groups/{group_id}`
pub async fn update_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Json(request): Json<GroupUpdateRequest>,
) -> ApiResult<Json<Value>> {
    if let Some(name) = &request.name {
        let taken: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM user_groups WHERE name = $1 AND id != $2")
                .bind(name)
                .bind(group_id)
                .fetch_optional(&state.pool)
                .await?;
        if taken.is_some() {
            return Err(ApiError::Conflict("Group name already exists".to_string()));
        }
    }

    let rows_affected = sqlx::query(
        r#"
        UPDATE user_groups
        SET name = COALESCE($2, name),
            description = COALESCE($3, description),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(group_id)
    .bind(&request.name)
    .bind(&request.description)
    .execute(&state.pool)
    .await?
    .rows_affected();

    if rows_affected == 0 {
        return Err(ApiError::NotFound("Group not found".to_string()));
    }
    Ok(Json(json!({ "success": true, "message": "Group updated" })))
}

/// `DELETE /admin/groups/{group_id}`
///
/// Deleting a group also removes every share row referencing it.
pub async fn delete_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let rows_affected = sqlx::query("DELETE FROM user_groups WHERE id = $1")
        .bind(group_id)
        .execute(&state.pool)
        .await?
        .rows_affected();

    if rows_affected == 0 {
        return Err(ApiError::NotFound("Group not found".to_string()));
    }

    tracing::info!(group_id = %group_id, "Group deleted (shares cascaded)");
    Ok(Json(json!({ "success": true, "message": "Group deleted" })))
}

/// `GET /admin/groups/{group_id}/users`
pub async fn group_users(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let members = group_member_rows(&state, group_id).await?;
    Ok(Json(json!({
        "success": true,
        "count": members.len(),
        "users": members,
    })))
}

async fn group_member_rows(state: &AppState, group_id: Uuid) -> ApiResult<Vec<GroupMemberRow>> {
    let members = sqlx::query_as::<_, GroupMemberRow>(
        r#"
        SELECT u.id AS user_id, u.username, u.email
        FROM users u
        JOIN user_group_assignments uga ON uga.user_id = u.id
        WHERE uga.group_id = $1 AND u.is_active = TRUE
        ORDER BY u.username
        "#,
    )
    .bind(group_id)
    .fetch_all(&state.pool)
    .await?;
    Ok(members)
}

/// `GET /admin/users/{user_id}/groups`
pub async fn user_groups(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let groups = sqlx::query_as::<_, GroupRow>(
        r#"
        SELECT g.id, g.name, g.description, g.created_at, g.updated_at
        FROM user_groups g
        JOIN user_group_assignments uga ON uga.group_id = g.id
        WHERE uga.user_id = $1
        ORDER BY g.name
        "#,
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "count": groups.len(),
        "groups": groups,
    })))
}

/// `POST /admin/users/{user_id}/groups/{group_id}`
pub async fn assign_user_to_group(
    State(state): State<AppState>,
    Path((user_id, group_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Value>> {
    fetch_user(&state, user_id).await?;
    let group_exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM user_groups WHERE id = $1")
        .bind(group_id)
        .fetch_optional(&state.pool)
        .await?;
    if group_exists.is_none() {
        return Err(ApiError::NotFound("Group not found".to_string()));
    }

    sqlx::query(
        r#"
        INSERT INTO user_group_assignments (user_id, group_id)
        VALUES ($1, $2)
        ON CONFLICT (user_id, group_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(group_id)
    .execute(&state.pool)
    .await?;

    Ok(Json(json!({ "success": true, "message": "User assigned to group" })))
}

/// `DELETE /admin/users/{user_id}/groups/{group_id}`
pub async fn remove_user_from_group(
    State(state): State<AppState>,
    Path((user_id, group_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Value>> {
    let rows_affected = sqlx::query(
        "DELETE FROM user_group_assignments WHERE user_id = $1 AND group_id = $2",
    )
    .bind(user_id)
    .bind(group_id)
    .execute(&state.pool)
    .await?
    .rows_affected();

    if rows_affected == 0 {
        return Err(ApiError::NotFound("Assignment not found".to_string()));
    }
    Ok(Json(json!({ "success": true, "message": "User removed from group" })))
}

// =============================================================================
// Role-permission handlers
// =============================================================================

/// `GET /admin/role-permissions`
pub async fn get_all_role_permissions(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let rows = sqlx::query_as::<_, RolePermissionRow>(
        r#"
        SELECT role, permission, resource_type
        FROM role_permissions
        ORDER BY role, resource_type, permission
        "#,
    )
    .fetch_all(&state.pool)
    .await?;
    let total = rows.len();

    // Grouped by (role, resource_type) for readability.
    let mut grouped: Vec<Value> = Vec::new();
    let mut index: HashMap<(String, String), Vec<String>> = HashMap::new();
    for row in rows {
        index
            .entry((row.role, row.resource_type))
            .or_default()
            .push(row.permission);
    }
    let mut keys: Vec<_> = index.keys().cloned().collect();
    keys.sort();
    for (role, resource_type) in keys {
        let mut permissions = index[&(role.clone(), resource_type.clone())].clone();
        permissions.sort();
        grouped.push(json!({
            "role": role,
            "resource_type": resource_type,
            "permissions": permissions,
        }));
    }

    Ok(Json(json!({
        "success": true,
        "permissions": grouped,
        "count": grouped.len(),
        "total_permissions": total,
    })))
}

/// `GET /admin/role-permissions/{role}`
pub async fn get_role_permissions(
    State(state): State<AppState>,
    Path(role): Path<String>,
) -> ApiResult<Json<Value>> {
    validate_role(&role)?;

    let rows = sqlx::query_as::<_, RolePermissionRow>(
        r#"
        SELECT role, permission, resource_type
        FROM role_permissions
        WHERE role = $1
        ORDER BY resource_type, permission
        "#,
    )
    .bind(&role)
    .fetch_all(&state.pool)
    .await?;
    let total = rows.len();

    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        grouped.entry(row.resource_type).or_default().push(row.permission);
    }

    Ok(Json(json!({
        "success": true,
        "role": role,
        "permissions": grouped,
        "total_permissions": total,
    })))
}

/// `POST /admin/role-permissions`
pub async fn add_role_permission(
    State(state): State<AppState>,
    Json(request): Json<RolePermissionChange>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    validate_role(&request.role)?;
    validate_permission(&request.permission)?;
    validate_resource_type(&request.resource_type)?;
    reject_admin_role(&request.role)?;

    let rows_affected = sqlx::query(
        r#"
        INSERT INTO role_permissions (role, permission, resource_type)
        VALUES ($1, $2, $3)
        ON CONFLICT (role, permission, resource_type) DO NOTHING
        "#,
    )
    .bind(&request.role)
    .bind(&request.permission)
    .bind(&request.resource_type)
    .execute(&state.pool)
    .await?
    .rows_affected();

    if rows_affected == 0 {
        return Err(ApiError::Validation(format!(
            "Permission {} already exists for role {} on resource {}",
            request.permission, request.role, request.resource_type
        )));
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": format!(
                "Permission {} added to role {} for resource {}",
                request.permission, request.role, request.resource_type
            ),
        })),
    ))
}

/// `DELETE /admin/role-permissions`
pub async fn remove_role_permission(
    State(state): State<AppState>,
    Json(request): Json<RolePermissionChange>,
) -> ApiResult<Json<Value>> {
    validate_role(&request.role)?;
    validate_permission(&request.permission)?;
    validate_resource_type(&request.resource_type)?;
    reject_admin_role(&request.role)?;

    let rows_affected = sqlx::query(
        "DELETE FROM role_permissions WHERE role = $1 AND permission = $2 AND resource_type = $3",
    )
    .bind(&request.role)
    .bind(&request.permission)
    .bind(&request.resource_type)
    .execute(&state.pool)
    .await?
    .rows_affected();

    if rows_affected == 0 {
        return Err(ApiError::Validation(format!(
            "Permission {} does not exist for role {} on resource {}",
            request.permission, request.role, request.resource_type
        )));
    }

    Ok(Json(json!({
        "success": true,
        "message": format!(
            "Permission {} removed from role {} for resource {}",
            request.permission, request.role, request.resource_type
        ),
    })))
}

/// `POST /admin/role-permissions/reset/{role}`
pub async fn reset_role_permissions(
    State(state): State<AppState>,
    Path(role_raw): Path<String>,
) -> ApiResult<Json<Value>> {
    let role = validate_role(&role_raw)?;
    reject_admin_role(&role_raw)?;

    let defaults = authz::default_permissions_for_role(role);

    let mut tx = state.pool.begin().await?;
    let removed = sqlx::query("DELETE FROM role_permissions WHERE role = $1")
        .bind(role.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

    for (permission, resource_type) in &defaults {
        sqlx::query(
            "INSERT INTO role_permissions (role, permission, resource_type) VALUES ($1, $2, $3)",
        )
        .bind(role.as_str())
        .bind(*permission)
        .bind(*resource_type)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!(
        role = role.as_str(),
        removed = removed,
        restored = defaults.len(),
        "Role permissions reset to defaults"
    );
    Ok(Json(json!({
        "success": true,
        "message": format!("Role {} permissions reset to defaults", role.as_str()),
        "removed_permissions_count": removed,
        "added_permissions_count": defaults.len(),
    })))
}

// =============================================================================
// Workflows (admin view)
// =============================================================================

/// `GET /admin/workflows`
pub async fn list_all_workflows(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let workflows = store::list_all(&state.pool).await?;
    Ok(Json(json!({
        "success": true,
        "count": workflows.len(),
        "workflows": workflows,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::PERMISSIONS;

    #[test]
    fn admin_role_writes_are_rejected() {
        assert!(reject_admin_role("admin").is_err());
        assert!(reject_admin_role("manager").is_ok());
        assert!(reject_admin_role("viewer").is_ok());
    }

    #[test]
    fn resource_type_validation() {
        for resource in RESOURCE_TYPES {
            assert!(validate_resource_type(resource).is_ok());
        }
        assert!(validate_resource_type("database").is_err());
    }

    #[test]
    fn permission_validation_covers_all_four() {
        for permission in PERMISSIONS {
            assert!(validate_permission(permission).is_ok());
        }
        assert!(validate_permission("share").is_err());
    }
}
