//! Control tools: reserved names the engine handles itself instead of
//! dispatching them to the tool registry.

use serde::Deserialize;
use serde_json::{Value, json};
use wright_core::ToolSpec;

use crate::tasks::TaskStatus;

pub const CREATE_TASKS: &str = "create_tasks";
pub const UPDATE_TASK: &str = "update_task";
pub const REQUEST_REVIEW: &str = "request_review";
pub const FINAL_RESPONSE: &str = "final_response";

pub const CONTROL_TOOLS: [&str; 4] = [CREATE_TASKS, UPDATE_TASK, REQUEST_REVIEW, FINAL_RESPONSE];

pub fn is_control_tool(name: &str) -> bool {
    CONTROL_TOOLS.contains(&name)
}

/// A parsed control tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCall {
    CreateTasks {
        tasks: Vec<String>,
    },
    UpdateTask {
        id: String,
        status: TaskStatus,
        result: Option<String>,
    },
    RequestReview {
        summary: String,
        files_changed: Vec<String>,
    },
    FinalResponse {
        message: String,
        summary: Option<String>,
        next_steps: Vec<String>,
    },
}

/// `create_tasks` accepts plain strings or `{ "content": ... }` objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum TaskEntry {
    Text(String),
    Item { content: String },
}

#[derive(Deserialize)]
struct CreateTasksArgs {
    tasks: Vec<TaskEntry>,
}

#[derive(Deserialize)]
struct UpdateTaskArgs {
    #[serde(alias = "task_id", alias = "taskId")]
    id: String,
    status: TaskStatus,
    #[serde(default)]
    result: Option<String>,
}

#[derive(Deserialize)]
struct RequestReviewArgs {
    summary: String,
    #[serde(default, alias = "filesChanged")]
    files_changed: Vec<String>,
}

#[derive(Deserialize)]
struct FinalResponseArgs {
    message: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default, alias = "nextSteps")]
    next_steps: Vec<String>,
}

impl ControlCall {
    /// Parse the arguments of a control tool call. `Err` carries a message
    /// the model can act on.
    pub fn parse(name: &str, arguments: &Value) -> Result<Self, String> {
        fn args<T: for<'de> Deserialize<'de>>(arguments: &Value) -> Result<T, String> {
            serde_json::from_value(arguments.clone()).map_err(|e| e.to_string())
        }

        match name {
            CREATE_TASKS => {
                let parsed: CreateTasksArgs = args(arguments)?;
                let tasks: Vec<String> = parsed
                    .tasks
                    .into_iter()
                    .map(|entry| match entry {
                        TaskEntry::Text(text) | TaskEntry::Item { content: text } => text,
                    })
                    .filter(|t| !t.trim().is_empty())
                    .collect();
                if tasks.is_empty() {
                    return Err("'tasks' must contain at least one non-empty entry".into());
                }
                Ok(ControlCall::CreateTasks { tasks })
            }
            UPDATE_TASK => {
                let parsed: UpdateTaskArgs = args(arguments)?;
                Ok(ControlCall::UpdateTask {
                    id: parsed.id,
                    status: parsed.status,
                    result: parsed.result,
                })
            }
            REQUEST_REVIEW => {
                let parsed: RequestReviewArgs = args(arguments)?;
                Ok(ControlCall::RequestReview {
                    summary: parsed.summary,
                    files_changed: parsed.files_changed,
                })
            }
            FINAL_RESPONSE => {
                let parsed: FinalResponseArgs = args(arguments)?;
                Ok(ControlCall::FinalResponse {
                    message: parsed.message,
                    summary: parsed.summary,
                    next_steps: parsed.next_steps,
                })
            }
            other => Err(format!("'{other}' is not a control tool")),
        }
    }
}

/// Specs advertised to the model alongside the domain tools.
pub fn control_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            CREATE_TASKS,
            "Plan the work as a list of tasks. Each entry becomes a pending task with an id you can update later.",
            json!({
                "type": "object",
                "properties": {
                    "tasks": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Task descriptions, in the order they should be done"
                    }
                },
                "required": ["tasks"]
            }),
        ),
        ToolSpec::new(
            UPDATE_TASK,
            "Update the status of a task created with create_tasks.",
            json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Task id, e.g. task_1" },
                    "status": { "type": "string", "enum": ["pending", "in_progress", "completed", "failed"] },
                    "result": { "type": "string", "description": "Short note on the outcome" }
                },
                "required": ["id", "status"]
            }),
        ),
        ToolSpec::new(
            REQUEST_REVIEW,
            "Ask for an independent review of the changes before finishing. \
             If the verdict lists must-fix items you have to address them first.",
            json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string", "description": "What was done" },
                    "files_changed": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Paths relative to the project root"
                    }
                },
                "required": ["summary"]
            }),
        ),
        ToolSpec::new(
            FINAL_RESPONSE,
            "Finish the run and reply to the user. Call this exactly once, when the work is done.",
            json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "Reply shown to the user" },
                    "summary": { "type": "string", "description": "Summary of the changes" },
                    "next_steps": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["message"]
            }),
        ),
    ]
}
