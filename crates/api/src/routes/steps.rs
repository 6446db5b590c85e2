//! Step routes: append, update (by order or id), delete, reorder, list.
//!
//! Every mutation runs the validate-orders pass before the steps are
//! persisted back onto the workflow row.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::authz::Permission;
use crate::error::{ApiError, ApiResult};
use crate::routes::workflows::authorize_targeted;
use crate::state::AppState;
use crate::workflows::model::{Step, StepInput, StepUpdate, Workflow};
use crate::workflows::{steps as step_ops, store};

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    /// Current step orders listed in their new positions.
    pub sequence: Vec<u32>,
}

/// Load a workflow the user may modify steps on.
async fn load_for_write(
    state: &AppState,
    auth_user: &AuthUser,
    workflow_id: Uuid,
) -> ApiResult<Workflow> {
    let workflow = store::get_for_user(&state.pool, workflow_id, auth_user.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Workflow not found or access denied".to_string()))?;
    authorize_targeted(state, auth_user, &workflow, Permission::Write).await?;
    Ok(workflow)
}

/// Persist a mutated step list after the validation pass.
async fn persist_steps(state: &AppState, workflow_id: Uuid, steps: &[Step]) -> ApiResult<()> {
    step_ops::validate_orders(steps)?;
    if !store::save_steps(&state.pool, workflow_id, steps).await? {
        return Err(ApiError::NotFound("Workflow not found".to_string()));
    }
    Ok(())
}

fn apply_update(step: &mut Step, update: StepUpdate) {
    if let Some(name) = update.name {
        step.name = name;
    }
    if let Some(description) = update.description {
        step.description = Some(description);
    }
    if let Some(script_type) = update.script_type {
        step.script_type = script_type;
    }
    if let Some(script_filename) = update.script_filename {
        step.script_filename = Some(script_filename);
    }
    if let Some(run_command) = update.run_command {
        step.run_command = Some(run_command);
    }
    if let Some(dependencies) = update.dependencies {
        step.dependencies = dependencies;
    }
    if let Some(parameters) = update.parameters {
        step.parameters = parameters;
    }
    if let Some(is_active) = update.is_active {
        step.is_active = is_active;
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// `GET /workflow/{id}/steps`
pub async fn list_steps(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let workflow = store::get_for_user(&state.pool, workflow_id, auth_user.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Workflow not found or access denied".to_string()))?;
    authorize_targeted(&state, &auth_user, &workflow, Permission::Read).await?;

    let mut steps = workflow.steps;
    steps.sort_by_key(|s| s.order);
    let count = steps.len();
    Ok(Json(json!({
        "success": true,
        "steps": steps,
        "count": count,
    })))
}

/// `POST /workflow/{id}/steps`
///
/// Appends a step. An omitted order auto-assigns to the end; an explicit
/// order must not collide with an existing step.
pub async fn append_step(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(workflow_id): Path<Uuid>,
    Json(input): Json<StepInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let workflow = load_for_write(&state, &auth_user, workflow_id).await?;
    let mut steps = workflow.steps;

    let order = match input.order {
        Some(order) => {
            step_ops::ensure_order_free(&steps, order, None)?;
            order
        }
        None => step_ops::next_order(&steps),
    };

    let step = input.into_step(order);
    if let Some(directory_name) = &step.directory_name {
        // Directory creation failures are logged, never fatal.
        store::ensure_step_dir(&state.config.data_dir, workflow_id, directory_name);
    }

    steps.push(step.clone());
    persist_steps(&state, workflow_id, &steps).await?;

    tracing::info!(
        workflow_id = %workflow_id,
        step_id = %step.id,
        order = order,
        "Step appended"
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "step": step })),
    ))
}

/// `PUT /workflow/{id}/steps/{order}`
pub async fn update_step_by_order(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path((workflow_id, order)): Path<(Uuid, u32)>,
    Json(update): Json<StepUpdate>,
) -> ApiResult<Json<Value>> {
    let workflow = load_for_write(&state, &auth_user, workflow_id).await?;
    let mut steps = workflow.steps;

    let index = steps
        .iter()
        .position(|s| s.order == order)
        .ok_or_else(|| ApiError::NotFound(format!("No step with order {order}")))?;

    if let Some(new_order) = update.order {
        let step_id = steps[index].id.clone();
        step_ops::ensure_order_free(&steps, new_order, Some(&step_id))?;
        steps[index].order = new_order;
    }
    apply_update(&mut steps[index], update);

    let updated = steps[index].clone();
    persist_steps(&state, workflow_id, &steps).await?;
    Ok(Json(json!({ "success": true, "step": updated })))
}

/// `PUT /workflow/{id}/steps/id/{step_id}`
pub async fn update_step_by_id(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path((workflow_id, step_id)): Path<(Uuid, String)>,
    Json(update): Json<StepUpdate>,
) -> ApiResult<Json<Value>> {
    let workflow = load_for_write(&state, &auth_user, workflow_id).await?;
    let mut steps = workflow.steps;

    let index = steps
        .iter()
        .position(|s| s.id == step_id)
        .ok_or_else(|| ApiError::NotFound(format!("No step with id {step_id}")))?;

    if let Some(new_order) = update.order {
        step_ops::ensure_order_free(&steps, new_order, Some(&step_id))?;
        steps[index].order = new_order;
    }
    apply_update(&mut steps[index], update);

    let updated = steps[index].clone();
    persist_steps(&state, workflow_id, &steps).await?;
    Ok(Json(json!({ "success": true, "step": updated })))
}

/// `DELETE /workflow/{id}/steps/{order}`
///
/// Removes the step and compacts the remainder to a contiguous 1..N
/// sequence in their existing relative order.
pub async fn delete_step_by_order(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path((workflow_id, order)): Path<(Uuid, u32)>,
) -> ApiResult<Json<Value>> {
    let workflow = load_for_write(&state, &auth_user, workflow_id).await?;
    let mut steps = workflow.steps;

    let index = steps
        .iter()
        .position(|s| s.order == order)
        .ok_or_else(|| ApiError::NotFound(format!("No step with order {order}")))?;

    let removed = steps.remove(index);
    step_ops::compact_orders(&mut steps);
    persist_steps(&state, workflow_id, &steps).await?;

    tracing::info!(
        workflow_id = %workflow_id,
        step_id = %removed.id,
        "Step deleted, remaining orders compacted"
    );
    Ok(Json(json!({
        "success": true,
        "message": format!("Step '{}' deleted", removed.name),
        "remaining_steps": steps.len(),
    })))
}

/// `PUT /workflow/{id}/steps/reorder`
///
/// The body lists the current orders in their new positions; steps are
/// renumbered 1..N in that sequence, ids untouched.
pub async fn reorder_steps(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(workflow_id): Path<Uuid>,
    Json(request): Json<ReorderRequest>,
) -> ApiResult<Json<Value>> {
    let workflow = load_for_write(&state, &auth_user, workflow_id).await?;
    let mut steps = workflow.steps;

    step_ops::apply_reorder(&mut steps, &request.sequence)?;
    persist_steps(&state, workflow_id, &steps).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Steps reordered",
        "steps": steps,
    })))
}
