//! Built-in project tools. All paths are relative to the project root in the
//! [`ToolContext`]; nothing outside it is reachable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;
use wright_core::{Result, ToolContext, ToolSpec, WrightError};

use crate::project::ProjectFs;
use crate::registry::{ToolExecutor, ToolRegistry};

const MAX_STDOUT_CHARS: usize = 10_000;
const MAX_STDERR_CHARS: usize = 5_000;

/// Settings for the built-in tool set.
#[derive(Debug, Clone)]
pub struct BuiltinOptions {
    /// Register `run_command`.
    pub allow_commands: bool,
    pub command_timeout: Duration,
    /// Cap for a single `read_file`.
    pub max_read_bytes: usize,
    /// Cap for a single `list_files`.
    pub max_list_entries: usize,
}

impl Default for BuiltinOptions {
    fn default() -> Self {
        Self {
            allow_commands: true,
            command_timeout: Duration::from_secs(120),
            max_read_bytes: 200_000,
            max_list_entries: 500,
        }
    }
}

/// Register every built-in tool on `registry`.
pub fn register_builtins(registry: &mut ToolRegistry, options: &BuiltinOptions) -> Result<()> {
    registry.register(Arc::new(ReadFile {
        max_bytes: options.max_read_bytes,
    }))?;
    registry.register(Arc::new(ListFiles {
        max_entries: options.max_list_entries,
    }))?;
    registry.register(Arc::new(WriteFile))?;
    registry.register(Arc::new(DeleteFile))?;
    if options.allow_commands {
        registry.register(Arc::new(RunCommand {
            timeout: options.command_timeout,
        }))?;
    }
    Ok(())
}

fn str_arg<'a>(tool: &str, params: &'a Value, key: &str) -> Result<&'a str> {
    params[key].as_str().ok_or_else(|| WrightError::ToolExecution {
        tool: tool.into(),
        reason: format!("missing '{key}' argument"),
    })
}

// ── read_file ──────────────────────────────────────────────────

pub struct ReadFile {
    max_bytes: usize,
}

#[async_trait]
impl ToolExecutor for ReadFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "read_file",
            "Read a text file from the project. Long files are cut off and marked truncated.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to the project root" }
                },
                "required": ["path"]
            }),
        )
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = str_arg("read_file", &params, "path")?;
        let file = ProjectFs::new(&ctx.root).read_capped(path, self.max_bytes).await?;
        Ok(serde_json::to_value(file)?)
    }
}

// ── list_files ─────────────────────────────────────────────────

pub struct ListFiles {
    max_entries: usize,
}

#[async_trait]
impl ToolExecutor for ListFiles {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "list_files",
            "List files and directories in the project. Build output and VCS folders are skipped.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory relative to the project root (default: root)" },
                    "recursive": { "type": "boolean", "description": "Descend into subdirectories (default: true)" }
                }
            }),
        )
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = params["path"].as_str().unwrap_or(".");
        let recursive = params["recursive"].as_bool().unwrap_or(true);
        let entries = ProjectFs::new(&ctx.root)
            .list(path, self.max_entries, recursive)
            .await?;
        Ok(json!({
            "count": entries.len(),
            "truncated": entries.len() >= self.max_entries,
            "entries": entries,
        }))
    }
}

// ── write_file ─────────────────────────────────────────────────

pub struct WriteFile;

#[async_trait]
impl ToolExecutor for WriteFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "write_file",
            "Create or overwrite a file in the project with the given content. Parent directories are created.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to the project root" },
                    "content": { "type": "string", "description": "Full file content" }
                },
                "required": ["path", "content"]
            }),
        )
        .destructive()
        .guard_args(&["path"])
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = str_arg("write_file", &params, "path")?;
        let content = str_arg("write_file", &params, "content")?;
        let bytes = ProjectFs::new(&ctx.root).write(path, content).await?;
        info!(project = %ctx.project_id, path, bytes, "wrote file");
        Ok(json!({ "path": path, "bytes_written": bytes }))
    }
}

// ── delete_file ────────────────────────────────────────────────

pub struct DeleteFile;

#[async_trait]
impl ToolExecutor for DeleteFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "delete_file",
            "Delete a file or directory inside the project.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to the project root" }
                },
                "required": ["path"]
            }),
        )
        .destructive()
        .guard_args(&["path"])
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = str_arg("delete_file", &params, "path")?;
        ProjectFs::new(&ctx.root).delete(path).await?;
        info!(project = %ctx.project_id, path, "deleted path");
        Ok(json!({ "path": path, "deleted": true }))
    }
}

// ── run_command ────────────────────────────────────────────────

pub struct RunCommand {
    timeout: Duration,
}

#[async_trait]
impl ToolExecutor for RunCommand {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "run_command",
            "Run a shell command in the project directory (build, test, migrate). \
             Interactive commands fail immediately because stdin is closed.",
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to execute" },
                    "cwd": { "type": "string", "description": "Working directory relative to the project root" },
                    "timeout_secs": { "type": "integer", "description": "Override the default timeout" }
                },
                "required": ["command"]
            }),
        )
        .destructive()
        .guard_args(&["command", "cwd"])
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let command = str_arg("run_command", &params, "command")?;
        let timeout = params["timeout_secs"]
            .as_u64()
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);
        let cwd = ProjectFs::new(&ctx.root).resolve(params["cwd"].as_str().unwrap_or("."))?;

        info!(project = %ctx.project_id, command, timeout_secs = timeout.as_secs(), "running command");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| WrightError::ToolExecution {
                tool: "run_command".into(),
                reason: format!("command timed out after {}s", timeout.as_secs()),
            })?
            .map_err(|e| WrightError::ToolExecution {
                tool: "run_command".into(),
                reason: e.to_string(),
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout: String = String::from_utf8_lossy(&output.stdout)
            .chars()
            .take(MAX_STDOUT_CHARS)
            .collect();
        let stderr: String = String::from_utf8_lossy(&output.stderr)
            .chars()
            .take(MAX_STDERR_CHARS)
            .collect();

        if !output.status.success() {
            return Err(WrightError::ToolExecution {
                tool: "run_command".into(),
                reason: format!("exit code {exit_code}\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}"),
            });
        }
        Ok(json!({
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}
