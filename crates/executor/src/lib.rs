// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Opsflow Step Executor
//!
//! Runs a single workflow step in a sandbox and reports a structured
//! result. Two modes:
//!
//! - **Local**: the step's interpreter (or custom run command) is spawned
//!   as a child process with the step parameters merged into the
//!   environment. Hard 5-minute timeout, killed on expiry.
//! - **Container**: the step runs inside a locked-down container (no
//!   network, read-only root filesystem, 512 MiB / 50% CPU, privileges
//!   dropped) with the step directory mounted read-only at `/workspace`.
//!
//! Script failures are never executor errors: they come back as a result
//! with `status = failed` and the captured output. Only the inability to
//! even attempt execution (Docker daemon missing, spawn failure) is
//! reported through the error text of a failed result.

pub mod container;
pub mod deps;
pub mod images;
pub mod local;
pub mod types;

pub use container::ContainerLimits;
pub use images::{default_image, resolve_image};
pub use types::{
    truncate_output, ExecuteRequest, ExecutionMode, ExecutionResult, StepStatus, EXEC_TIMEOUT,
    MAX_OUTPUT_CHARS,
};

use bollard::Docker;
use sqlx::PgPool;
use time::OffsetDateTime;

/// Sandboxed step execution service.
///
/// Holds an optional Docker handle (container mode degrades to an error
/// result when the daemon is unreachable) and the pool used to resolve
/// per-script-type container images.
#[derive(Clone)]
pub struct StepExecutor {
    docker: Option<Docker>,
    pool: PgPool,
}

impl StepExecutor {
    /// Connect to the local Docker daemon if one is available. A missing
    /// daemon only disables container mode.
    pub fn new(pool: PgPool) -> Self {
        let docker = match Docker::connect_with_local_defaults() {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "Docker not available, container mode disabled");
                None
            }
        };
        Self { docker, pool }
    }

    /// Execute a single step and return its structured result.
    pub async fn execute(&self, req: ExecuteRequest) -> ExecutionResult {
        let started_at = OffsetDateTime::now_utc();

        // Optional pre-run dependency install. Failures are logged and the
        // step still proceeds: the dependencies may already be present.
        if !req.dependencies.is_empty() {
            if let Some(docker) = &self.docker {
                if let Err(e) =
                    deps::install_dependencies(docker, &req.script_type, &req.dependencies).await
                {
                    tracing::warn!(
                        workflow_id = %req.workflow_id,
                        step_id = %req.step_id,
                        error = %e,
                        "Dependency installation failed, continuing with execution"
                    );
                }
            } else {
                tracing::warn!(
                    step_id = %req.step_id,
                    "Docker not available for dependency installation, skipping"
                );
            }
        }

        let outcome = match req.mode {
            ExecutionMode::Local => local::run_local(&req).await,
            ExecutionMode::Container => match &self.docker {
                Some(docker) => {
                    let image = resolve_image(&self.pool, &req.script_type).await;
                    container::run_container(docker, &image, &req).await
                }
                None => ExecutionResult::infrastructure_failure(
                    started_at,
                    "Docker not available for container execution",
                ),
            },
        };

        let ended_at = OffsetDateTime::now_utc();
        outcome.finalize(started_at, ended_at)
    }
}
