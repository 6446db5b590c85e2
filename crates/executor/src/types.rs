//! Execution request/result types shared by both sandbox modes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Hard wall-clock limit for a single step (and for dependency installs).
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum stored output length, including the truncation marker.
pub const MAX_OUTPUT_CHARS: usize = 4000;

/// Marker appended when output is cut.
pub const TRUNCATION_SUFFIX: &str = "…<truncated>";

/// Exit code reported when a step is killed on timeout.
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// Where a step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Local,
    Container,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(ExecutionMode::Local),
            // "docker" is the wire name for container mode
            "docker" | "container" => Ok(ExecutionMode::Container),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// Terminal state of a single step run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
    Timeout,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// Everything the executor needs to run one step.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub workflow_id: Uuid,
    pub step_id: String,
    pub mode: ExecutionMode,
    /// Absolute path of the script file inside the step directory.
    pub script_path: PathBuf,
    /// Custom command line; `script.sh`/`script.py`/`script.js`
    /// placeholders are replaced with the real script path.
    pub run_command: Option<String>,
    /// Step directory; mounted read-only in container mode, used as the
    /// working directory in local mode.
    pub working_dir: PathBuf,
    pub script_type: String,
    /// Merged into the child environment.
    pub parameters: HashMap<String, String>,
    pub dependencies: Vec<String>,
}

/// Structured outcome of one step run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub status: StepStatus,
    pub return_code: Option<i64>,
    pub output: Option<String>,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    pub execution_time_seconds: f64,
}

impl ExecutionResult {
    /// Raw outcome before timing is attached.
    pub(crate) fn raw(
        status: StepStatus,
        return_code: Option<i64>,
        output: Option<String>,
        error: Option<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            success: status == StepStatus::Completed,
            status,
            return_code,
            output: output.map(|o| truncate_output(&o)),
            error: error.map(|e| truncate_output(&e)),
            start_time: now,
            end_time: now,
            execution_time_seconds: 0.0,
        }
    }

    /// Failure produced by the surrounding machinery rather than the
    /// script itself (daemon unreachable, spawn error).
    pub(crate) fn infrastructure_failure(
        started_at: OffsetDateTime,
        message: impl Into<String>,
    ) -> Self {
        let mut result = Self::raw(StepStatus::Failed, Some(1), None, Some(message.into()));
        result.start_time = started_at;
        result
    }

    /// Attach wall-clock timing.
    pub(crate) fn finalize(mut self, started_at: OffsetDateTime, ended_at: OffsetDateTime) -> Self {
        self.start_time = started_at;
        self.end_time = ended_at;
        self.execution_time_seconds = (ended_at - started_at).as_seconds_f64();
        self
    }
}

/// Bound stored output: at most [`MAX_OUTPUT_CHARS`] characters, ending
/// with the truncation marker when anything was cut.
pub fn truncate_output(raw: &str) -> String {
    let char_count = raw.chars().count();
    if char_count <= MAX_OUTPUT_CHARS {
        return raw.to_string();
    }
    let keep = MAX_OUTPUT_CHARS - TRUNCATION_SUFFIX.chars().count();
    let mut truncated: String = raw.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_SUFFIX);
    truncated
}

/// Replace script filename placeholders in a custom run command with the
/// real script path.
pub(crate) fn substitute_script_path(run_command: &str, script_path: &str) -> String {
    run_command
        .replace("script.sh", script_path)
        .replace("script.py", script_path)
        .replace("script.js", script_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_below_limit_is_untouched() {
        let raw = "hello world";
        assert_eq!(truncate_output(raw), raw);
    }

    #[test]
    fn output_at_limit_is_untouched() {
        let raw = "x".repeat(MAX_OUTPUT_CHARS);
        assert_eq!(truncate_output(&raw), raw);
    }

    #[test]
    fn oversized_output_is_bounded_and_marked() {
        // 10 MB of output must come back at most 4000 chars, ending with
        // the truncation marker.
        let raw = "y".repeat(10 * 1024 * 1024);
        let truncated = truncate_output(&raw);
        assert_eq!(truncated.chars().count(), MAX_OUTPUT_CHARS);
        assert!(truncated.ends_with(TRUNCATION_SUFFIX));
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let raw = "é".repeat(MAX_OUTPUT_CHARS + 100);
        let truncated = truncate_output(&raw);
        assert_eq!(truncated.chars().count(), MAX_OUTPUT_CHARS);
        assert!(truncated.ends_with(TRUNCATION_SUFFIX));
    }

    #[test]
    fn execution_mode_parses_wire_names() {
        assert_eq!("local".parse::<ExecutionMode>(), Ok(ExecutionMode::Local));
        assert_eq!(
            "docker".parse::<ExecutionMode>(),
            Ok(ExecutionMode::Container)
        );
        assert!("vm".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn run_command_placeholders_are_substituted() {
        assert_eq!(
            substitute_script_path("python3 script.py --verbose", "/work/steps/run.py"),
            "python3 /work/steps/run.py --verbose"
        );
        assert_eq!(
            substitute_script_path("bash script.sh", "/tmp/s"),
            "bash /tmp/s"
        );
    }

    #[test]
    fn status_display_matches_wire_format() {
        assert_eq!(StepStatus::Completed.to_string(), "completed");
        assert_eq!(StepStatus::Timeout.to_string(), "timeout");
    }
}
