//! Workflow and step models. Steps are embedded in the workflow row as
//! JSONB and round-trip through these types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

fn default_true() -> bool {
    true
}

/// One step of a workflow, including the execution metadata written back
/// after each run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Server-generated opaque id, unique within the workflow. Never
    /// taken from input.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// 1-based position within the workflow.
    pub order: u32,
    pub script_type: String,
    #[serde(default)]
    pub script_filename: Option<String>,
    #[serde(default)]
    pub run_command: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub directory_name: Option<String>,

    // Execution metadata, written back after each run.
    #[serde(default)]
    pub last_status: Option<String>,
    #[serde(default)]
    pub last_return_code: Option<i64>,
    #[serde(default)]
    pub last_output: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_run_started_at: Option<String>,
    #[serde(default)]
    pub last_run_ended_at: Option<String>,
    #[serde(default)]
    pub last_execution_time: Option<f64>,
}

impl Step {
    /// Step parameters as string key/value pairs for the child
    /// environment. Non-string JSON values are serialized compactly.
    pub fn parameter_env(&self) -> HashMap<String, String> {
        self.parameters
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect()
    }
}

/// Caller-supplied step fields. The id and execution metadata are never
/// accepted from input.
#[derive(Debug, Clone, Deserialize)]
pub struct StepInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Position; omitted on append means auto-assign to the end.
    #[serde(default)]
    pub order: Option<u32>,
    pub script_type: String,
    #[serde(default)]
    pub script_filename: Option<String>,
    #[serde(default)]
    pub run_command: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl StepInput {
    /// Materialize a new step with a fresh server-generated id.
    pub fn into_step(self, order: u32) -> Step {
        let id = Uuid::new_v4().to_string();
        Step {
            directory_name: Some(format!("step_{id}")),
            id,
            name: self.name,
            description: self.description,
            order,
            script_type: self.script_type,
            script_filename: self.script_filename,
            run_command: self.run_command,
            dependencies: self.dependencies,
            parameters: self.parameters,
            is_active: self.is_active,
            last_status: None,
            last_return_code: None,
            last_output: None,
            last_error: None,
            last_run_started_at: None,
            last_run_ended_at: None,
            last_execution_time: None,
        }
    }
}

/// Partial update of an existing step.
#[derive(Debug, Clone, Deserialize)]
pub struct StepUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub script_type: Option<String>,
    #[serde(default)]
    pub script_filename: Option<String>,
    #[serde(default)]
    pub run_command: Option<String>,
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    #[serde(default)]
    pub parameters: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// A workflow with its embedded steps.
#[derive(Debug, Clone, Serialize)]
pub struct Workflow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<Step>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
