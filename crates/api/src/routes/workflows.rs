//! Workflow routes: CRUD, sharing, permissions, execution.

use std::str::FromStr;

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use opsflow_executor::ExecutionMode;

use crate::auth::AuthUser;
use crate::authz::{
    self, allow_by_claims, allow_workflow_action, Permission, Role, SharePermission,
    WorkflowAccess,
};
use crate::error::{ApiError, ApiResult};
use crate::execution::{self, WorkflowRunResult};
use crate::state::AppState;
use crate::workflows::model::{StepInput, Workflow};
use crate::workflows::{steps as step_ops, store};

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkflowRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Option<Vec<StepInput>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ShareQuery {
    #[serde(default = "default_share_permission")]
    pub permission: String,
}

fn default_share_permission() -> String {
    "read".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ExecuteQuery {
    #[serde(default = "default_execution_type")]
    pub execution_type: String,
    #[serde(default)]
    pub continue_on_failure: bool,
}

fn default_execution_type() -> String {
    "local".to_string()
}

// =============================================================================
// Helpers
// =============================================================================

pub(crate) fn role_of(auth_user: &AuthUser) -> Role {
    Role::from_str(&auth_user.role).unwrap_or(Role::Viewer)
}

/// Resolve access and check a targeted operation in one go.
pub(crate) async fn authorize_targeted(
    state: &AppState,
    auth_user: &AuthUser,
    workflow: &Workflow,
    op: Permission,
) -> ApiResult<WorkflowAccess> {
    let access = authz::resolve_workflow_access(
        &state.pool,
        workflow.id,
        workflow.owner_id,
        auth_user.id,
    )
    .await?;

    if !allow_workflow_action(role_of(auth_user), auth_user.is_permanent_admin, access, op) {
        tracing::warn!(
            user_id = %auth_user.id,
            workflow_id = %workflow.id,
            op = op.as_str(),
            "Workflow operation denied"
        );
        return Err(ApiError::Forbidden);
    }
    Ok(access)
}

fn effective_permission_map(auth_user: &AuthUser, access: WorkflowAccess) -> Value {
    let role = role_of(auth_user);
    let mut map = serde_json::Map::new();
    for op in [
        Permission::Read,
        Permission::Write,
        Permission::Execute,
        Permission::Delete,
    ] {
        map.insert(
            op.as_str().to_string(),
            Value::Bool(allow_workflow_action(
                role,
                auth_user.is_permanent_admin,
                access,
                op,
            )),
        );
    }
    Value::Object(map)
}

// =============================================================================
// Handlers
// =============================================================================

/// `POST /workflow/create`
pub async fn create_workflow(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<CreateWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if !allow_by_claims(
        &auth_user.permissions,
        &auth_user.role,
        auth_user.is_permanent_admin,
        Permission::Write,
        "workflow",
    ) {
        return Err(ApiError::Forbidden);
    }

    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Workflow name is required".to_string()));
    }

    let workflow = store::create(
        &state.pool,
        auth_user.id,
        name,
        request.description.as_deref().map(str::trim),
    )
    .await?;

    tracing::info!(workflow_id = %workflow.id, user_id = %auth_user.id, "Workflow created");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "workflow_id": workflow.id,
            "message": format!("Workflow '{name}' created successfully"),
            "steps_count": 0,
        })),
    ))
}

/// `GET /workflow/list`
///
/// Owned plus group-shared workflows, deduplicated with the owner view
/// winning, each annotated with the caller's effective permissions.
pub async fn list_workflows(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Value>> {
    if !allow_by_claims(
        &auth_user.permissions,
        &auth_user.role,
        auth_user.is_permanent_admin,
        Permission::Read,
        "workflow",
    ) {
        return Err(ApiError::Forbidden);
    }

    let owned = store::list_owned(&state.pool, auth_user.id).await?;
    let shared = store::list_shared_for_user(&state.pool, auth_user.id).await?;
    let own_count = owned.len();
    let shared_count = shared.len();

    let mut entries: Vec<Value> = Vec::new();
    let mut seen: std::collections::HashSet<Uuid> = std::collections::HashSet::new();

    for workflow in &owned {
        seen.insert(workflow.id);
        let shares = store::shares_for_workflow(&state.pool, workflow.id).await?;
        entries.push(json!({
            "workflow": workflow,
            "access_type": "owner",
            "workflow_permission": "full",
            "effective_permissions": effective_permission_map(&auth_user, WorkflowAccess::Owner),
            "shared_groups": shares,
            "total_groups_shared": shares.len(),
        }));
    }

    for workflow in &shared {
        // A workflow can be both owned and shared into one of the
        // caller's groups; the owner view wins.
        if !seen.insert(workflow.id) {
            continue;
        }
        let access = authz::resolve_workflow_access(
            &state.pool,
            workflow.id,
            workflow.owner_id,
            auth_user.id,
        )
        .await?;
        let permission = match access {
            WorkflowAccess::Shared(share) => share.as_str(),
            _ => "read",
        };
        entries.push(json!({
            "workflow": workflow,
            "access_type": "group_shared",
            "workflow_permission": permission,
            "effective_permissions": effective_permission_map(&auth_user, access),
        }));
    }

    let role = role_of(&auth_user);
    let permission_summary = json!({
        "total_workflows": entries.len(),
        "owned_workflows": own_count,
        "shared_workflows": entries.len() - own_count,
        "user_role": role.as_str(),
        "can_create": matches!(role, Role::Admin | Role::Manager) || auth_user.is_permanent_admin,
        "can_delete": matches!(role, Role::Admin) || auth_user.is_permanent_admin,
        "can_execute": true,
    });

    let count = entries.len();
    Ok(Json(json!({
        "success": true,
        "workflows": entries,
        "permission_summary": permission_summary,
        "count": count,
        "own_count": own_count,
        "team_count": shared_count,
    })))
}

/// `GET /workflow/{id}`
pub async fn get_workflow(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let workflow = store::get_for_user(&state.pool, workflow_id, auth_user.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Workflow not found or access denied".to_string()))?;

    authorize_targeted(&state, &auth_user, &workflow, Permission::Read).await?;

    Ok(Json(json!({ "success": true, "workflow": workflow })))
}

/// `PUT /workflow/{id}`
pub async fn update_workflow(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(workflow_id): Path<Uuid>,
    Json(request): Json<UpdateWorkflowRequest>,
) -> ApiResult<Json<Value>> {
    let workflow = store::get_for_user(&state.pool, workflow_id, auth_user.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Workflow not found or access denied".to_string()))?;

    authorize_targeted(&state, &auth_user, &workflow, Permission::Write).await?;

    // A wholesale steps replacement is reconciled against the current
    // list by order: existing steps keep their ids and execution
    // metadata; only inputs on new orders get fresh ids.
    let steps = match request.steps {
        Some(inputs) => {
            let merged = step_ops::merge_step_inputs(&workflow.steps, inputs)?;
            for step in &merged {
                if let Some(directory_name) = &step.directory_name {
                    // Idempotent for surviving steps; failures are
                    // logged, never fatal.
                    store::ensure_step_dir(&state.config.data_dir, workflow_id, directory_name);
                }
            }
            Some(merged)
        }
        None => None,
    };

    let updated = store::update(
        &state.pool,
        workflow_id,
        store::WorkflowUpdate {
            name: request.name,
            description: request.description,
            steps,
            is_active: request.is_active,
        },
    )
    .await?;
    if !updated {
        return Err(ApiError::NotFound("Workflow not found".to_string()));
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("Workflow '{}' updated successfully", workflow.name),
    })))
}

/// `DELETE /workflow/{id}`
///
/// Deleting a workflow also removes all of its share rows.
pub async fn delete_workflow(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let workflow = store::get_for_user(&state.pool, workflow_id, auth_user.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Workflow not found or access denied".to_string()))?;

    authorize_targeted(&state, &auth_user, &workflow, Permission::Delete).await?;

    if !store::delete(&state.pool, workflow_id).await? {
        return Err(ApiError::NotFound("Workflow not found".to_string()));
    }

    tracing::info!(workflow_id = %workflow_id, user_id = %auth_user.id, "Workflow deleted");
    Ok(Json(json!({
        "success": true,
        "message": format!("Workflow '{}' deleted successfully", workflow.name),
    })))
}

/// `POST /workflow/{id}/share/groups/{gid}?permission=read|write|execute`
///
/// Upsert: sharing again with the same group updates the permission on
/// the existing row.
pub async fn share_workflow(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path((workflow_id, group_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<ShareQuery>,
) -> ApiResult<Json<Value>> {
    let permission = SharePermission::from_str(&query.permission)?;

    let workflow = store::get_any(&state.pool, workflow_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Workflow not found".to_string()))?;

    // Only the owner or an admin may manage shares.
    let is_admin = role_of(&auth_user) == Role::Admin || auth_user.is_permanent_admin;
    if workflow.owner_id != auth_user.id && !is_admin {
        return Err(ApiError::Forbidden);
    }

    let group_exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM user_groups WHERE id = $1")
        .bind(group_id)
        .fetch_optional(&state.pool)
        .await?;
    if group_exists.is_none() {
        return Err(ApiError::NotFound("Group not found".to_string()));
    }

    let share = store::share_upsert(&state.pool, workflow_id, group_id, permission.as_str()).await?;
    Ok(Json(json!({ "success": true, "share": share })))
}

/// `DELETE /workflow/{id}/share/groups/{gid}`
pub async fn unshare_workflow(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path((workflow_id, group_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Value>> {
    let workflow = store::get_any(&state.pool, workflow_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Workflow not found".to_string()))?;

    let is_admin = role_of(&auth_user) == Role::Admin || auth_user.is_permanent_admin;
    if workflow.owner_id != auth_user.id && !is_admin {
        return Err(ApiError::Forbidden);
    }

    if !store::unshare(&state.pool, workflow_id, group_id).await? {
        return Err(ApiError::NotFound("Share not found".to_string()));
    }

    Ok(Json(json!({ "success": true, "message": "Workflow unshared" })))
}

/// `GET /workflow/{id}/permissions`
pub async fn workflow_permissions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let workflow = store::get_any(&state.pool, workflow_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Workflow not found".to_string()))?;

    let access = authz::resolve_workflow_access(
        &state.pool,
        workflow.id,
        workflow.owner_id,
        auth_user.id,
    )
    .await?;

    let (access_type, permissions): (&str, Vec<&str>) = match access {
        WorkflowAccess::Owner => (
            "owner",
            vec!["read", "write", "execute", "delete", "share"],
        ),
        WorkflowAccess::Shared(share) => (
            "shared",
            share.granted().iter().map(|p| p.as_str()).collect(),
        ),
        WorkflowAccess::None => ("none", Vec::new()),
    };

    Ok(Json(json!({
        "success": true,
        "access_type": access_type,
        "permissions": permissions,
        "effective_permissions": effective_permission_map(&auth_user, access),
    })))
}

/// `POST /workflow/{id}/execute?execution_type=local|docker&continue_on_failure=`
pub async fn execute_workflow(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(workflow_id): Path<Uuid>,
    Query(query): Query<ExecuteQuery>,
) -> ApiResult<Json<WorkflowRunResult>> {
    let mode = ExecutionMode::from_str(&query.execution_type)
        .map_err(ApiError::Validation)?;

    let result = execution::run_workflow(
        &state.pool,
        &state.executor,
        &state.config.data_dir,
        &auth_user,
        workflow_id,
        mode,
        query.continue_on_failure,
    )
    .await?;

    Ok(Json(result))
}
