use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};
use wright_core::{Result, ToolContext, ToolResult, ToolSpec, WrightError};

use crate::guard::{CommandGuard, GuardVerdict};

/// An invocable operation exposed to the model.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Run the tool. Errors become failed [`ToolResult`]s in the registry.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Name-keyed table of executors, validated for uniqueness at registration.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolExecutor>>,
    specs: Vec<ToolSpec>,
    guard: CommandGuard,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_guard(CommandGuard::new())
    }

    pub fn with_guard(guard: CommandGuard) -> Self {
        Self {
            tools: HashMap::new(),
            specs: Vec::new(),
            guard,
        }
    }

    pub fn register(&mut self, tool: Arc<dyn ToolExecutor>) -> Result<()> {
        let spec = tool.spec();
        if self.tools.contains_key(&spec.name) {
            return Err(WrightError::DuplicateTool(spec.name));
        }
        debug!(tool = %spec.name, destructive = spec.destructive, "registered tool");
        self.tools.insert(spec.name.clone(), tool);
        self.specs.push(spec);
        Ok(())
    }

    /// Specs in registration order.
    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn is_destructive(&self, name: &str) -> bool {
        self.spec(name).is_some_and(|s| s.destructive)
    }

    /// Execute a tool by name. Never fails: unknown names, denied arguments,
    /// executor errors, panics and cancellation all come back as a failed
    /// [`ToolResult`].
    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "model requested an unknown tool");
            return ToolResult::err("unknown tool");
        };

        if self.is_destructive(name)
            && let Some(spec) = self.spec(name)
            && let GuardVerdict::Deny(rule) = self.guard.check(spec, &params)
        {
            warn!(tool = name, rule = %rule, project = %ctx.project_id, "destructive call denied");
            return ToolResult::err(format!("denied: {rule}"));
        }

        if ctx.cancel.is_cancelled() {
            return ToolResult::err("cancelled");
        }

        let run = AssertUnwindSafe(tool.execute(params, ctx)).catch_unwind();
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => return ToolResult::err("cancelled"),
            outcome = run => outcome,
        };

        match outcome {
            Ok(Ok(data)) => ToolResult::ok(data),
            Ok(Err(e)) => {
                debug!(tool = name, error = %e, "tool failed");
                ToolResult::err(e.to_string())
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                warn!(tool = name, panic = %reason, "tool panicked");
                ToolResult::err(format!("tool panicked: {reason}"))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
