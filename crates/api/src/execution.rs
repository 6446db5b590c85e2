//! Workflow execution: the sequential step loop.
//!
//! Steps run strictly in order so the metadata write-back is
//! predictable. Concurrent executions of the same workflow are not
//! coordinated — the final steps write overwrites the row atomically and
//! the last writer wins.

use std::str::FromStr;

use opsflow_executor::{ExecuteRequest, ExecutionMode, StepExecutor, StepStatus};
use serde::Serialize;
use sqlx::PgPool;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::authz::{self, Permission, Role};
use crate::error::{ApiError, ApiResult};
use crate::workflows::model::Step;
use crate::workflows::store;

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Completed,
    CompletedWithSkips,
    PartialFailed,
    Failed,
}

/// Per-step entry in the run report, in execution order.
#[derive(Debug, Serialize)]
pub struct StepRunReport {
    pub step_id: String,
    pub name: String,
    pub order: u32,
    pub status: String,
    pub return_code: Option<i64>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub execution_time_seconds: f64,
}

/// Result of one workflow execution.
#[derive(Debug, Serialize)]
pub struct WorkflowRunResult {
    pub workflow_id: Uuid,
    pub status: WorkflowRunStatus,
    /// Steps that actually ran (failures included).
    pub steps_executed: u32,
    pub steps_skipped: u32,
    pub steps_failed: u32,
    pub step_results: Vec<StepRunReport>,
}

/// Compute the overall status from the aggregate counts.
fn aggregate_status(
    steps_failed: u32,
    continue_on_failure: bool,
    steps_skipped: u32,
) -> WorkflowRunStatus {
    if steps_failed > 0 {
        if continue_on_failure {
            WorkflowRunStatus::PartialFailed
        } else {
            WorkflowRunStatus::Failed
        }
    } else if steps_skipped > 0 {
        WorkflowRunStatus::CompletedWithSkips
    } else {
        WorkflowRunStatus::Completed
    }
}

/// Execute a workflow on behalf of a user.
///
/// Authorizes `execute` per the role/share rules, runs active steps in
/// order, records per-step metadata regardless of outcome, and persists
/// the updated steps back onto the workflow row.
pub async fn run_workflow(
    pool: &PgPool,
    executor: &StepExecutor,
    data_dir: &str,
    auth_user: &AuthUser,
    workflow_id: Uuid,
    mode: ExecutionMode,
    continue_on_failure: bool,
) -> ApiResult<WorkflowRunResult> {
    let workflow = store::get_for_user(pool, workflow_id, auth_user.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Workflow not found or access denied".to_string()))?;

    let role = Role::from_str(&auth_user.role).unwrap_or(Role::Viewer);
    let access =
        authz::resolve_workflow_access(pool, workflow.id, workflow.owner_id, auth_user.id).await?;
    if !authz::allow_workflow_action(role, auth_user.is_permanent_admin, access, Permission::Execute)
    {
        tracing::warn!(
            user_id = %auth_user.id,
            workflow_id = %workflow_id,
            "Workflow execution denied"
        );
        return Err(ApiError::Forbidden);
    }

    let mut steps = workflow.steps.clone();
    steps.sort_by_key(|s| s.order);

    tracing::info!(
        workflow_id = %workflow_id,
        user_id = %auth_user.id,
        steps = steps.len(),
        mode = ?mode,
        continue_on_failure = continue_on_failure,
        "Workflow execution started"
    );

    let mut steps_executed: u32 = 0;
    let mut steps_skipped: u32 = 0;
    let mut steps_failed: u32 = 0;
    let mut step_results = Vec::new();

    for step in steps.iter_mut() {
        if !step.is_active {
            step.last_status = Some(StepStatus::Skipped.to_string());
            steps_skipped += 1;
            step_results.push(StepRunReport {
                step_id: step.id.clone(),
                name: step.name.clone(),
                order: step.order,
                status: StepStatus::Skipped.to_string(),
                return_code: None,
                output: None,
                error: None,
                execution_time_seconds: 0.0,
            });
            continue;
        }

        let result = executor
            .execute(build_request(data_dir, workflow_id, step, mode))
            .await;

        steps_executed += 1;
        let failed = !result.success;
        if failed {
            steps_failed += 1;
        }

        // Metadata is updated regardless of outcome.
        step.last_status = Some(result.status.to_string());
        step.last_return_code = result.return_code;
        step.last_output = result.output.clone();
        step.last_error = result.error.clone();
        step.last_run_started_at = result.start_time.format(&Rfc3339).ok();
        step.last_run_ended_at = result.end_time.format(&Rfc3339).ok();
        step.last_execution_time = Some(result.execution_time_seconds);

        step_results.push(StepRunReport {
            step_id: step.id.clone(),
            name: step.name.clone(),
            order: step.order,
            status: result.status.to_string(),
            return_code: result.return_code,
            output: result.output,
            error: result.error,
            execution_time_seconds: result.execution_time_seconds,
        });

        if failed && !continue_on_failure {
            tracing::warn!(
                workflow_id = %workflow_id,
                step_id = %step.id,
                "Step failed, aborting remaining steps"
            );
            break;
        }
    }

    let status = aggregate_status(steps_failed, continue_on_failure, steps_skipped);

    if !store::save_steps(pool, workflow_id, &steps).await? {
        tracing::error!(workflow_id = %workflow_id, "Failed to persist step metadata after run");
    }

    tracing::info!(
        workflow_id = %workflow_id,
        status = ?status,
        executed = steps_executed,
        skipped = steps_skipped,
        failed = steps_failed,
        "Workflow execution finished"
    );

    Ok(WorkflowRunResult {
        workflow_id,
        status,
        steps_executed,
        steps_skipped,
        steps_failed,
        step_results,
    })
}

/// Build the executor request for one step.
fn build_request(
    data_dir: &str,
    workflow_id: Uuid,
    step: &Step,
    mode: ExecutionMode,
) -> ExecuteRequest {
    let directory_name = step
        .directory_name
        .clone()
        .unwrap_or_else(|| format!("step_{}", step.id));
    let working_dir = store::step_dir(data_dir, workflow_id, &directory_name);

    let script_filename = step.script_filename.clone().unwrap_or_else(|| {
        match step.script_type.as_str() {
            "python" => "main.py".to_string(),
            "nodejs" => "main.js".to_string(),
            _ => "run.sh".to_string(),
        }
    });

    ExecuteRequest {
        workflow_id,
        step_id: step.id.clone(),
        mode,
        script_path: working_dir.join(script_filename),
        run_command: step.run_command.clone(),
        working_dir,
        script_type: step.script_type.clone(),
        parameters: step.parameter_env(),
        dependencies: step.dependencies.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_steps_clean_is_completed() {
        assert_eq!(aggregate_status(0, false, 0), WorkflowRunStatus::Completed);
        assert_eq!(aggregate_status(0, true, 0), WorkflowRunStatus::Completed);
    }

    #[test]
    fn skips_without_failures_is_completed_with_skips() {
        assert_eq!(
            aggregate_status(0, false, 2),
            WorkflowRunStatus::CompletedWithSkips
        );
    }

    #[test]
    fn failure_without_continue_is_failed() {
        assert_eq!(aggregate_status(1, false, 0), WorkflowRunStatus::Failed);
        // A skip elsewhere does not soften the failure.
        assert_eq!(aggregate_status(1, false, 1), WorkflowRunStatus::Failed);
    }

    #[test]
    fn failure_with_continue_is_partial_failed() {
        assert_eq!(aggregate_status(1, true, 0), WorkflowRunStatus::PartialFailed);
        assert_eq!(aggregate_status(2, true, 1), WorkflowRunStatus::PartialFailed);
    }
}
