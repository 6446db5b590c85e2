//! Container execution mode.
//!
//! Steps run in a throwaway container with no network, a read-only root
//! filesystem, bounded memory and CPU, and dropped privileges. The step
//! directory is mounted read-only at [`WORKSPACE_PATH`].

use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogsOptions, RemoveContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use uuid::Uuid;

use crate::types::{
    substitute_script_path, ExecuteRequest, ExecutionResult, StepStatus, EXEC_TIMEOUT,
    TIMEOUT_EXIT_CODE,
};

/// Fixed mount point of the step directory inside the container.
pub const WORKSPACE_PATH: &str = "/workspace";

/// Resource ceilings for a step container.
#[derive(Debug, Clone, Copy)]
pub struct ContainerLimits {
    pub memory_bytes: i64,
    pub cpu_period: i64,
    pub cpu_quota: i64,
    pub readonly_rootfs: bool,
}

impl ContainerLimits {
    /// Limits for step execution: 512 MiB, 50% of one CPU, read-only root.
    pub fn execution() -> Self {
        Self {
            memory_bytes: 512 * 1024 * 1024,
            cpu_period: 100_000,
            cpu_quota: 50_000,
            readonly_rootfs: true,
        }
    }

    /// Tighter limits for dependency installation: 256 MiB, 25% CPU.
    /// Installation needs a writable filesystem.
    pub fn install() -> Self {
        Self {
            memory_bytes: 256 * 1024 * 1024,
            cpu_period: 100_000,
            cpu_quota: 25_000,
            readonly_rootfs: false,
        }
    }

    pub(crate) fn to_host_config(self, binds: Option<Vec<String>>) -> HostConfig {
        HostConfig {
            memory: Some(self.memory_bytes),
            cpu_period: Some(self.cpu_period),
            cpu_quota: Some(self.cpu_quota),
            network_mode: Some("none".to_string()),
            readonly_rootfs: Some(self.readonly_rootfs),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            binds,
            ..Default::default()
        }
    }
}

/// Default in-container command line for a script type.
fn container_command(req: &ExecuteRequest) -> String {
    let file_name = req
        .script_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "script".to_string());
    let container_script = format!("{WORKSPACE_PATH}/{file_name}");

    match &req.run_command {
        Some(run_command) => substitute_script_path(run_command, &container_script),
        None => match req.script_type.as_str() {
            "python" => format!("python3 {container_script}"),
            "nodejs" => format!("node {container_script}"),
            _ => format!("/bin/sh {container_script}"),
        },
    }
}

/// Run one step in a container and collect its logs.
pub async fn run_container(docker: &Docker, image: &str, req: &ExecuteRequest) -> ExecutionResult {
    let name = format!("opsflow-step-{}", Uuid::new_v4());
    let command = container_command(req);
    let env: Vec<String> = req
        .parameters
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    let bind = format!("{}:{WORKSPACE_PATH}:ro", req.working_dir.to_string_lossy());

    let config = Config {
        image: Some(image.to_string()),
        cmd: Some(vec!["/bin/sh".to_string(), "-c".to_string(), command]),
        env: Some(env),
        working_dir: Some(WORKSPACE_PATH.to_string()),
        host_config: Some(ContainerLimits::execution().to_host_config(Some(vec![bind]))),
        ..Default::default()
    };

    tracing::debug!(
        step_id = %req.step_id,
        image = %image,
        container = %name,
        "Starting step container"
    );

    let created = docker
        .create_container(
            Some(CreateContainerOptions {
                name: name.clone(),
                platform: None,
            }),
            config,
        )
        .await;
    if let Err(e) = created {
        return ExecutionResult::raw(
            StepStatus::Failed,
            Some(1),
            None,
            Some(format!("Failed to create container: {e}")),
        );
    }

    if let Err(e) = docker.start_container::<String>(&name, None).await {
        remove_container(docker, &name).await;
        return ExecutionResult::raw(
            StepStatus::Failed,
            Some(1),
            None,
            Some(format!("Failed to start container: {e}")),
        );
    }

    let result = wait_for_container(docker, &name, req).await;
    remove_container(docker, &name).await;
    result
}

/// Await container exit up to the hard timeout, then read the logs.
async fn wait_for_container(docker: &Docker, name: &str, req: &ExecuteRequest) -> ExecutionResult {
    let mut wait_stream = docker.wait_container(name, None::<WaitContainerOptions<String>>);

    let status_code = match tokio::time::timeout(EXEC_TIMEOUT, wait_stream.next()).await {
        Ok(Some(Ok(response))) => response.status_code,
        // Non-zero exits surface as a typed wait error carrying the code.
        Ok(Some(Err(DockerError::DockerContainerWaitError { code, .. }))) => code,
        Ok(Some(Err(e))) => {
            return ExecutionResult::raw(
                StepStatus::Failed,
                Some(1),
                None,
                Some(format!("Container wait failed: {e}")),
            );
        }
        Ok(None) => {
            return ExecutionResult::raw(
                StepStatus::Failed,
                Some(1),
                None,
                Some("Container wait stream ended unexpectedly".to_string()),
            );
        }
        Err(_) => {
            tracing::warn!(step_id = %req.step_id, container = %name, "Container execution timed out, killing");
            if let Err(e) = docker
                .kill_container(name, None::<KillContainerOptions<String>>)
                .await
            {
                tracing::error!(container = %name, error = %e, "Failed to kill timed-out container");
            }
            return ExecutionResult::raw(
                StepStatus::Timeout,
                Some(TIMEOUT_EXIT_CODE),
                None,
                Some("Execution timeout (5 minutes)".to_string()),
            );
        }
    };

    let logs = collect_logs(docker, name).await;

    if status_code == 0 {
        ExecutionResult::raw(StepStatus::Completed, Some(status_code), Some(logs), None)
    } else {
        ExecutionResult::raw(
            StepStatus::Failed,
            Some(status_code),
            Some(logs.clone()),
            Some(logs),
        )
    }
}

/// Drain the container's stdout/stderr into one string.
async fn collect_logs(docker: &Docker, name: &str) -> String {
    let mut log_stream = docker.logs(
        name,
        Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        }),
    );

    let mut collected = String::new();
    while let Some(chunk) = log_stream.next().await {
        match chunk {
            Ok(output) => {
                collected.push_str(&String::from_utf8_lossy(&output.into_bytes()));
            }
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "Failed to read container logs");
                break;
            }
        }
    }
    collected
}

/// Force-remove a finished (or killed) container.
async fn remove_container(docker: &Docker, name: &str) {
    let removed = docker
        .remove_container(
            name,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await;
    if let Err(e) = removed {
        tracing::warn!(container = %name, error = %e, "Failed to remove step container");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn request(script_type: &str, run_command: Option<&str>) -> ExecuteRequest {
        ExecuteRequest {
            workflow_id: Uuid::new_v4(),
            step_id: "step-1".to_string(),
            mode: crate::types::ExecutionMode::Container,
            script_path: PathBuf::from("/data/workflows/wf/step_1/main.py"),
            run_command: run_command.map(String::from),
            working_dir: PathBuf::from("/data/workflows/wf/step_1"),
            script_type: script_type.to_string(),
            parameters: HashMap::new(),
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn python_command_points_into_workspace() {
        let cmd = container_command(&request("python", None));
        assert_eq!(cmd, "python3 /workspace/main.py");
    }

    #[test]
    fn custom_command_substitutes_container_path() {
        let cmd = container_command(&request("python", Some("python3 script.py --dry-run")));
        assert_eq!(cmd, "python3 /workspace/main.py --dry-run");
    }

    #[test]
    fn execution_limits_are_locked_down() {
        let host = ContainerLimits::execution().to_host_config(None);
        assert_eq!(host.memory, Some(512 * 1024 * 1024));
        assert_eq!(host.cpu_quota, Some(50_000));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(
            host.security_opt,
            Some(vec!["no-new-privileges".to_string()])
        );
    }

    #[test]
    fn install_limits_are_tighter_but_writable() {
        let host = ContainerLimits::install().to_host_config(None);
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.cpu_quota, Some(25_000));
        assert_eq!(host.readonly_rootfs, Some(false));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
    }
}
