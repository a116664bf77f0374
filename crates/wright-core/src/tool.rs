use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::types::ProjectId;

/// Description of a tool advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique name, e.g. "read_file", "run_command".
    pub name: String,
    /// Human-readable description for the LLM.
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
    /// Whether the tool mutates the project. Destructive tools have their
    /// arguments screened before they run.
    #[serde(default)]
    pub destructive: bool,
    /// Top-level arguments the guard screens. Empty means every string
    /// argument is screened.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guarded_args: Vec<String>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            destructive: false,
            guarded_args: Vec::new(),
        }
    }

    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    /// Limit guard screening to the named arguments.
    pub fn guard_args(mut self, names: &[&str]) -> Self {
        self.guarded_args = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

/// A request from the LLM to call a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// The result of executing a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Render the result as the text fed back to the model.
    pub fn to_model_text(&self) -> String {
        match (&self.data, &self.error) {
            (_, Some(err)) => format!("Error: {err}"),
            (Some(Value::String(s)), None) => s.clone(),
            (Some(data), None) => data.to_string(),
            (None, None) => "ok".to_string(),
        }
    }
}

/// Execution context handed to every tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub project_id: ProjectId,
    pub domain: Option<String>,
    /// Root directory of the target project.
    pub root: PathBuf,
    /// Cancelled when the owning run is cancelled.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(project_id: impl Into<ProjectId>, root: impl Into<PathBuf>) -> Self {
        Self {
            project_id: project_id.into(),
            domain: None,
            root: root.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}
