//! Workflow persistence. Workflows are rows with their steps embedded as
//! JSONB; shares are join rows keyed (workflow, group).

use std::path::{Path, PathBuf};

use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::workflows::model::{Step, Workflow};

#[derive(Debug, FromRow)]
struct WorkflowRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    description: Option<String>,
    steps: Json<Vec<Step>>,
    is_active: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl WorkflowRow {
    fn into_workflow(self) -> Workflow {
        Workflow {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            description: self.description,
            steps: self.steps.0,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const WORKFLOW_COLUMNS: &str =
    "id, owner_id, name, description, steps, is_active, created_at, updated_at";

/// Same column list qualified for joins aliased `w`.
const WORKFLOW_COLUMNS_QUALIFIED: &str =
    "w.id, w.owner_id, w.name, w.description, w.steps, w.is_active, w.created_at, w.updated_at";

/// Create a workflow with no steps.
pub async fn create(
    pool: &PgPool,
    owner_id: Uuid,
    name: &str,
    description: Option<&str>,
) -> ApiResult<Workflow> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        r#"
        INSERT INTO workflows (id, owner_id, name, description, steps)
        VALUES ($1, $2, $3, $4, '[]'::jsonb)
        RETURNING {WORKFLOW_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(owner_id)
    .bind(name)
    .bind(description)
    .fetch_one(pool)
    .await?;

    Ok(row.into_workflow())
}

/// Fetch a workflow the user owns.
pub async fn get_owned(pool: &PgPool, workflow_id: Uuid, user_id: Uuid) -> ApiResult<Option<Workflow>> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1 AND owner_id = $2"
    ))
    .bind(workflow_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(WorkflowRow::into_workflow))
}

/// Fetch a workflow the user can reach: owned first, then shared with a
/// group the user belongs to (shared reads require the workflow active).
pub async fn get_for_user(
    pool: &PgPool,
    workflow_id: Uuid,
    user_id: Uuid,
) -> ApiResult<Option<Workflow>> {
    if let Some(workflow) = get_owned(pool, workflow_id, user_id).await? {
        return Ok(Some(workflow));
    }

    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        r#"
        SELECT DISTINCT {WORKFLOW_COLUMNS_QUALIFIED}
        FROM workflows w
        JOIN workflow_shares ws ON w.id = ws.workflow_id
        JOIN user_group_assignments uga ON ws.group_id = uga.group_id
        WHERE uga.user_id = $1 AND w.id = $2 AND w.is_active = TRUE
        "#
    ))
    .bind(user_id)
    .bind(workflow_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(WorkflowRow::into_workflow))
}

/// Fetch without a user restriction (admin views, execution write-back).
pub async fn get_any(pool: &PgPool, workflow_id: Uuid) -> ApiResult<Option<Workflow>> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"
    ))
    .bind(workflow_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(WorkflowRow::into_workflow))
}

/// All workflows the user owns, newest first.
pub async fn list_owned(pool: &PgPool, user_id: Uuid) -> ApiResult<Vec<Workflow>> {
    let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE owner_id = $1 ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(WorkflowRow::into_workflow).collect())
}

/// Active workflows shared with any group the user belongs to.
pub async fn list_shared_for_user(pool: &PgPool, user_id: Uuid) -> ApiResult<Vec<Workflow>> {
    let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
        r#"
        SELECT DISTINCT {WORKFLOW_COLUMNS_QUALIFIED}
        FROM workflows w
        JOIN workflow_shares ws ON w.id = ws.workflow_id
        JOIN user_group_assignments uga ON ws.group_id = uga.group_id
        WHERE uga.user_id = $1 AND w.is_active = TRUE
        ORDER BY w.created_at DESC
        "#
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(WorkflowRow::into_workflow).collect())
}

/// All workflows (admin listing), newest first.
pub async fn list_all(pool: &PgPool) -> ApiResult<Vec<Workflow>> {
    let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(WorkflowRow::into_workflow).collect())
}

/// Fields a workflow update may touch. `None` leaves the column as-is.
#[derive(Debug, Default)]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub steps: Option<Vec<Step>>,
    pub is_active: Option<bool>,
}

/// Apply a partial update. Returns whether the row existed.
pub async fn update(pool: &PgPool, workflow_id: Uuid, fields: WorkflowUpdate) -> ApiResult<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE workflows
        SET name = COALESCE($2, name),
            description = COALESCE($3, description),
            steps = COALESCE($4, steps),
            is_active = COALESCE($5, is_active),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(workflow_id)
    .bind(fields.name)
    .bind(fields.description)
    .bind(fields.steps.map(Json))
    .bind(fields.is_active)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// Persist the step list after a mutation or an execution. The whole
/// workflow row is overwritten atomically; the last writer wins.
pub async fn save_steps(pool: &PgPool, workflow_id: Uuid, steps: &[Step]) -> ApiResult<bool> {
    let rows_affected =
        sqlx::query("UPDATE workflows SET steps = $2, updated_at = NOW() WHERE id = $1")
            .bind(workflow_id)
            .bind(Json(steps))
            .execute(pool)
            .await?
            .rows_affected();

    Ok(rows_affected > 0)
}

/// Delete a workflow. Share rows go with it via the foreign key.
pub async fn delete(pool: &PgPool, workflow_id: Uuid) -> ApiResult<bool> {
    let rows_affected = sqlx::query("DELETE FROM workflows WHERE id = $1")
        .bind(workflow_id)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(rows_affected > 0)
}

// =============================================================================
// Shares
// =============================================================================

#[derive(Debug, FromRow, serde::Serialize)]
pub struct ShareRow {
    pub id: i64,
    pub workflow_id: Uuid,
    pub group_id: Uuid,
    pub permission: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Share a workflow with a group, or update the permission of an
/// existing share. Exactly one row per (workflow, group).
pub async fn share_upsert(
    pool: &PgPool,
    workflow_id: Uuid,
    group_id: Uuid,
    permission: &str,
) -> ApiResult<ShareRow> {
    let row = sqlx::query_as::<_, ShareRow>(
        r#"
        INSERT INTO workflow_shares (workflow_id, group_id, permission)
        VALUES ($1, $2, $3)
        ON CONFLICT (workflow_id, group_id)
        DO UPDATE SET permission = EXCLUDED.permission, updated_at = NOW()
        RETURNING id, workflow_id, group_id, permission, created_at, updated_at
        "#,
    )
    .bind(workflow_id)
    .bind(group_id)
    .bind(permission)
    .fetch_one(pool)
    .await?;

    tracing::info!(
        workflow_id = %workflow_id,
        group_id = %group_id,
        permission = %permission,
        "Workflow share upserted"
    );
    Ok(row)
}

/// Remove a workflow's share with a group.
pub async fn unshare(pool: &PgPool, workflow_id: Uuid, group_id: Uuid) -> ApiResult<bool> {
    let rows_affected =
        sqlx::query("DELETE FROM workflow_shares WHERE workflow_id = $1 AND group_id = $2")
            .bind(workflow_id)
            .bind(group_id)
            .execute(pool)
            .await?
            .rows_affected();

    Ok(rows_affected > 0)
}

/// All shares of one workflow.
pub async fn shares_for_workflow(pool: &PgPool, workflow_id: Uuid) -> ApiResult<Vec<ShareRow>> {
    let rows = sqlx::query_as::<_, ShareRow>(
        r#"
        SELECT id, workflow_id, group_id, permission, created_at, updated_at
        FROM workflow_shares
        WHERE workflow_id = $1
        ORDER BY created_at
        "#,
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// =============================================================================
// Step directories
// =============================================================================

/// Filesystem area for a step's script files.
pub fn step_dir(data_dir: &str, workflow_id: Uuid, directory_name: &str) -> PathBuf {
    Path::new(data_dir)
        .join("workflows")
        .join(workflow_id.to_string())
        .join(directory_name)
}

/// Create the step directory. Failure is logged but never fatal: the
/// step is still created and local runs may still point elsewhere.
pub fn ensure_step_dir(data_dir: &str, workflow_id: Uuid, directory_name: &str) -> PathBuf {
    let dir = step_dir(data_dir, workflow_id, directory_name);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(
            workflow_id = %workflow_id,
            directory = %dir.display(),
            error = %e,
            "Failed to create step directory"
        );
    }
    dir
}
