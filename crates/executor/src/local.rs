//! Local subprocess execution mode.

use tokio::process::Command;

use crate::types::{
    substitute_script_path, ExecuteRequest, ExecutionResult, StepStatus, EXEC_TIMEOUT,
    TIMEOUT_EXIT_CODE,
};

/// Default interpreter for a script type when no run command is given.
fn default_interpreter(script_type: &str) -> &'static str {
    match script_type {
        "python" => "python3",
        "nodejs" => "node",
        _ => "/bin/sh",
    }
}

/// Build the argv for a step: either the substituted custom run command
/// or `<interpreter> <script>`.
fn build_argv(req: &ExecuteRequest) -> Vec<String> {
    let script_path = req.script_path.to_string_lossy().to_string();
    match &req.run_command {
        Some(run_command) => substitute_script_path(run_command, &script_path)
            .split_whitespace()
            .map(String::from)
            .collect(),
        None => vec![
            default_interpreter(&req.script_type).to_string(),
            script_path,
        ],
    }
}

/// Run the step as a child process. The environment is the process
/// environment with the step parameters layered on top. The child is
/// killed when the 5-minute limit expires.
pub async fn run_local(req: &ExecuteRequest) -> ExecutionResult {
    let argv = build_argv(req);
    let Some((program, args)) = argv.split_first() else {
        return ExecutionResult::raw(
            StepStatus::Failed,
            Some(1),
            None,
            Some("Empty run command".to_string()),
        );
    };

    tracing::debug!(
        step_id = %req.step_id,
        program = %program,
        "Spawning local step process"
    );

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&req.working_dir)
        .envs(&req.parameters)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        // The dropped wait future must take the child down with it.
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ExecutionResult::raw(
                StepStatus::Failed,
                Some(1),
                None,
                Some(format!("Failed to spawn step process: {e}")),
            );
        }
    };

    match tokio::time::timeout(EXEC_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let code = output.status.code().map(i64::from).unwrap_or(1);

            if output.status.success() {
                ExecutionResult::raw(StepStatus::Completed, Some(code), Some(stdout), None)
            } else {
                ExecutionResult::raw(StepStatus::Failed, Some(code), Some(stdout), Some(stderr))
            }
        }
        Ok(Err(e)) => ExecutionResult::raw(
            StepStatus::Failed,
            Some(1),
            None,
            Some(format!("Failed to collect step output: {e}")),
        ),
        Err(_) => {
            tracing::warn!(step_id = %req.step_id, "Local step execution timed out, process killed");
            ExecutionResult::raw(
                StepStatus::Timeout,
                Some(TIMEOUT_EXIT_CODE),
                None,
                Some("Execution timeout (5 minutes)".to_string()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn request(script_type: &str, run_command: Option<&str>) -> ExecuteRequest {
        ExecuteRequest {
            workflow_id: Uuid::new_v4(),
            step_id: "step-1".to_string(),
            mode: crate::types::ExecutionMode::Local,
            script_path: PathBuf::from("/work/steps/main.py"),
            run_command: run_command.map(String::from),
            working_dir: PathBuf::from("/work/steps"),
            script_type: script_type.to_string(),
            parameters: HashMap::new(),
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn python_steps_default_to_python3() {
        let argv = build_argv(&request("python", None));
        assert_eq!(argv, vec!["python3", "/work/steps/main.py"]);
    }

    #[test]
    fn unknown_types_default_to_sh() {
        let argv = build_argv(&request("terraform", None));
        assert_eq!(argv[0], "/bin/sh");
    }

    #[test]
    fn custom_run_command_wins_and_is_substituted() {
        let argv = build_argv(&request("python", Some("python3 -u script.py --fast")));
        assert_eq!(
            argv,
            vec!["python3", "-u", "/work/steps/main.py", "--fast"]
        );
    }

    #[tokio::test]
    async fn successful_command_is_completed() {
        let mut req = request("sh", Some("/bin/sh -c true"));
        req.working_dir = std::env::temp_dir();
        let result = run_local(&req).await;
        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.return_code, Some(0));
        assert!(result.success);
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let mut req = request("sh", Some("/bin/sh -c false"));
        req.working_dir = std::env::temp_dir();
        let result = run_local(&req).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.return_code, Some(1));
        assert!(!result.success);
    }

    #[tokio::test]
    async fn missing_program_is_a_failed_result_not_a_panic() {
        let mut req = request("sh", Some("/no/such/binary-xyz"));
        req.working_dir = std::env::temp_dir();
        let result = run_local(&req).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error.is_some());
    }
}
