//! The orchestration loop.
//!
//! One strictly sequential loop per session: ask the model, run what it asks
//! for, feed the results back, repeat until `final_response`, a tool-free
//! answer, a fatal provider error, cancellation or the iteration cap.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};
use wright_config::WrightConfig;
use wright_core::{EventKind, Message, Result, Role, ToolCall, ToolContext, ToolResult, ToolSpec, WrightError};
use wright_llm::{Generation, ProviderAdapter};
use wright_tools::ToolRegistry;

use crate::context::truncate_tool_result;
use crate::control::{self, ControlCall};
use crate::fallback::{self, TerminalPayload};
use crate::review::ReviewSubroutine;
use crate::session::{ConversationSession, SessionStatus};

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are Wright, an autonomous build agent working inside a software project.
Work through tools: inspect the project before changing it, make the changes, and verify them.
Plan non-trivial work with create_tasks and keep each task current with update_task.
When the work is done, call request_review with a summary and the files you changed. \
If the review lists must-fix items, fix them and request another review.
Finish by calling final_response with a message for the user. Do not stop without it.";

/// Loop limits and behavior.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub system_prompt: String,
    pub max_iterations: u32,
    pub history_window: usize,
    pub tool_result_max_tokens: usize,
    pub parallel_tool_calls: bool,
    pub max_rate_limit_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: 100,
            history_window: 100,
            tool_result_max_tokens: 12_000,
            parallel_tool_calls: true,
            max_rate_limit_retries: 3,
            backoff_base: Duration::from_millis(2000),
            backoff_max: Duration::from_millis(60_000),
        }
    }
}

impl EngineConfig {
    pub fn from_config(config: &WrightConfig) -> Self {
        Self {
            system_prompt: config
                .agent
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_iterations: config.agent.max_iterations,
            history_window: config.agent.history_window,
            tool_result_max_tokens: config.agent.tool_result_max_tokens,
            parallel_tool_calls: config.agent.parallel_tool_calls,
            max_rate_limit_retries: config.retry.max_rate_limit_retries,
            backoff_base: Duration::from_millis(config.retry.backoff_base_ms),
            backoff_max: Duration::from_millis(config.retry.backoff_max_ms),
        }
    }

    /// Provider hint first, else exponential from the base, capped.
    pub fn backoff_delay(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let delay = match retry_after_secs {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => self.backoff_base.saturating_mul(2u32.saturating_pow(attempt)),
        };
        delay.min(self.backoff_max)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub status: SessionStatus,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == SessionStatus::Complete
    }
}

/// Why the loop stopped early.
enum Halt {
    Cancelled,
    Failed { error: String, kind: &'static str },
}

/// Result of handling one turn's tool calls.
enum TurnEnd {
    Continue,
    Finished(TerminalPayload),
}

/// Result of a single control call.
enum ControlStep {
    Result(ToolResult),
    Finish(TerminalPayload),
}

pub struct OrchestrationEngine {
    adapter: Arc<ProviderAdapter>,
    tools: Arc<ToolRegistry>,
    review: ReviewSubroutine,
    config: EngineConfig,
}

impl OrchestrationEngine {
    /// Fails when a domain tool uses a control tool's name.
    pub fn new(
        adapter: Arc<ProviderAdapter>,
        tools: Arc<ToolRegistry>,
        review: ReviewSubroutine,
        config: EngineConfig,
    ) -> Result<Self> {
        if let Some(name) = tools.names().into_iter().find(|n| control::is_control_tool(n)) {
            return Err(WrightError::ReservedToolName(name));
        }
        Ok(Self {
            adapter,
            tools,
            review,
            config,
        })
    }

    pub fn adapter(&self) -> &Arc<ProviderAdapter> {
        &self.adapter
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Domain tools followed by control tools.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        let mut specs = self.tools.specs().to_vec();
        specs.extend(control::control_specs());
        specs
    }

    /// Drive `session` until it completes or fails. The user message has
    /// already been appended and the session is running.
    pub async fn run(&self, session: &ConversationSession, ctx: &ToolContext) -> RunOutcome {
        let specs = self.tool_specs();
        let mut iteration = 0;

        while iteration < self.config.max_iterations {
            iteration += 1;
            debug!(session = session.id(), iteration, "iteration started");
            session.emit(
                EventKind::Thinking,
                json!({ "iteration": iteration, "message": format!("iteration {iteration}") }),
            );

            let generation = match self.generate(session, ctx, &specs, iteration).await {
                Ok(generation) => generation,
                Err(halt) => return self.halt(session, halt, iteration),
            };
            if let Some(thinking) = generation.thinking.as_deref().filter(|t| !t.is_empty()) {
                session.emit(
                    EventKind::Thinking,
                    json!({ "iteration": iteration, "message": thinking, "source": "model" }),
                );
            }

            if !generation.has_tool_calls() {
                let payload = self.finish_without_tools(session, generation.content);
                return self.complete(session, payload, iteration);
            }

            match self.run_tool_turn(session, ctx, generation).await {
                TurnEnd::Finished(payload) => return self.complete(session, payload, iteration),
                TurnEnd::Continue if ctx.cancel.is_cancelled() => {
                    return self.halt(session, Halt::Cancelled, iteration);
                }
                TurnEnd::Continue => {}
            }
        }

        warn!(session = session.id(), iterations = iteration, "maximum iterations reached");
        self.halt(
            session,
            Halt::Failed {
                error: "maximum iterations reached".into(),
                kind: "max_iterations",
            },
            iteration,
        )
    }

    /// One model turn, retrying rate limits with backoff. Retries do not
    /// consume the iteration budget.
    async fn generate(
        &self,
        session: &ConversationSession,
        ctx: &ToolContext,
        specs: &[ToolSpec],
        iteration: u32,
    ) -> std::result::Result<Generation, Halt> {
        let mut attempt = 0;
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
            let window = session.window(self.config.history_window);
            let system = self.system_prompt(session, ctx, window.omitted_note());

            let result = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(Halt::Cancelled),
                result = self.adapter.generate(Some(&system), &window.messages, specs) => result,
            };

            match result {
                Ok(generation) => return Ok(generation),
                Err(e) if e.is_rate_limited() && attempt < self.config.max_rate_limit_retries => {
                    let delay = self.config.backoff_delay(attempt, e.retry_after_secs());
                    attempt += 1;
                    warn!(
                        session = session.id(),
                        iteration,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    session.emit(
                        EventKind::Thinking,
                        json!({
                            "iteration": iteration,
                            "message": format!("rate limited, retrying in {}ms", delay.as_millis()),
                            "backoff": true,
                            "attempt": attempt,
                            "delay_ms": delay.as_millis() as u64,
                        }),
                    );
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => return Err(Halt::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) if e.is_rate_limited() => {
                    return Err(Halt::Failed {
                        error: format!("rate limited after {attempt} retries: {e}"),
                        kind: "rate_limited",
                    });
                }
                Err(e) => {
                    return Err(Halt::Failed {
                        error: e.to_string(),
                        kind: "provider",
                    });
                }
            }
        }
    }

    fn system_prompt(&self, session: &ConversationSession, ctx: &ToolContext, omitted: Option<String>) -> String {
        let mut prompt = self.config.system_prompt.clone();
        prompt.push_str(&format!("\n\nProject: {}", session.project_id()));
        if let Some(domain) = &ctx.domain {
            prompt.push_str(&format!("\nDomain: {domain}"));
        }
        let tasks = session.render_tasks();
        if !tasks.is_empty() {
            prompt.push_str(&format!("\n\nCurrent tasks:\n{tasks}"));
        }
        if let Some(note) = omitted {
            prompt.push_str(&format!("\n\n{note}"));
        }
        prompt
    }

    /// Execute every call of a turn. Each call gets exactly one tool-role
    /// message, in the order the model issued them.
    async fn run_tool_turn(&self, session: &ConversationSession, ctx: &ToolContext, generation: Generation) -> TurnEnd {
        let calls = generation.tool_calls;
        if !generation.content.is_empty() {
            session.emit(
                EventKind::Message,
                json!({ "role": "assistant", "content": generation.content }),
            );
        }
        session.push_message(Message::assistant_tool_calls(generation.content, calls.clone()));

        let mut review_demands_work = false;
        let mut idx = 0;
        while idx < calls.len() {
            let call = &calls[idx];

            if control::is_control_tool(&call.tool_name) {
                self.emit_call(session, call);
                let step = if ctx.cancel.is_cancelled() {
                    ControlStep::Result(ToolResult::err("cancelled"))
                } else {
                    self.handle_control(session, ctx, call, &mut review_demands_work).await
                };
                match step {
                    ControlStep::Result(result) => self.record_result(session, call, &result),
                    ControlStep::Finish(payload) => {
                        self.record_result(session, call, &ToolResult::ok(json!({ "accepted": true })));
                        for skipped in &calls[idx + 1..] {
                            self.record_result(
                                session,
                                skipped,
                                &ToolResult::err("skipped: run finished by final_response"),
                            );
                        }
                        return TurnEnd::Finished(payload);
                    }
                }
                idx += 1;
                continue;
            }

            let end = self.batch_end(&calls, idx);
            let batch = &calls[idx..end];
            for call in batch {
                self.emit_call(session, call);
            }
            let results = if batch.len() > 1 {
                debug!(session = session.id(), calls = batch.len(), "executing tool calls concurrently");
                join_all(
                    batch
                        .iter()
                        .map(|c| self.tools.execute(&c.tool_name, c.arguments.clone(), ctx)),
                )
                .await
            } else {
                vec![self.tools.execute(&call.tool_name, call.arguments.clone(), ctx).await]
            };
            for (call, result) in batch.iter().zip(&results) {
                self.record_result(session, call, result);
            }
            idx = end;
        }
        TurnEnd::Continue
    }

    /// End of the run of consecutive domain calls starting at `start` that
    /// may execute together. Always at least one call.
    fn batch_end(&self, calls: &[ToolCall], start: usize) -> usize {
        if !self.config.parallel_tool_calls {
            return start + 1;
        }
        let parallel_safe =
            |c: &ToolCall| !control::is_control_tool(&c.tool_name) && !self.tools.is_destructive(&c.tool_name);
        if !parallel_safe(&calls[start]) {
            return start + 1;
        }
        calls[start..]
            .iter()
            .position(|c| !parallel_safe(c))
            .map_or(calls.len(), |offset| start + offset)
    }

    async fn handle_control(
        &self,
        session: &ConversationSession,
        ctx: &ToolContext,
        call: &ToolCall,
        review_demands_work: &mut bool,
    ) -> ControlStep {
        let parsed = match ControlCall::parse(&call.tool_name, &call.arguments) {
            Ok(parsed) => parsed,
            Err(reason) => {
                warn!(session = session.id(), tool = %call.tool_name, %reason, "invalid control arguments");
                return ControlStep::Result(ToolResult::err(format!(
                    "invalid arguments for {}: {reason}",
                    call.tool_name
                )));
            }
        };

        match parsed {
            ControlCall::CreateTasks { tasks } => {
                let created = session.create_tasks(tasks);
                for task in &created {
                    session.emit(EventKind::TaskUpdate, json!({ "action": "created", "task": task }));
                }
                info!(session = session.id(), count = created.len(), "tasks created");
                ControlStep::Result(ToolResult::ok(json!({ "created": created })))
            }
            ControlCall::UpdateTask { id, status, result } => match session.update_task(&id, status, result) {
                Some(task) => {
                    session.emit(EventKind::TaskUpdate, json!({ "action": "updated", "task": task }));
                    ControlStep::Result(ToolResult::ok(json!({ "task": task })))
                }
                None => {
                    warn!(session = session.id(), task = %id, "update for unknown task");
                    ControlStep::Result(ToolResult::err(format!("task not found: {id}")))
                }
            },
            ControlCall::RequestReview { summary, files_changed } => {
                session.transition(SessionStatus::Reviewing);
                let outcome = tokio::select! {
                    _ = ctx.cancel.cancelled() => Err(WrightError::Cancelled),
                    outcome = self.review.review(&ctx.root, &summary, &files_changed) => outcome,
                };
                session.transition(SessionStatus::Running);

                match outcome {
                    Ok(verdict) => {
                        session.emit(EventKind::Review, json!({ "verdict": verdict }));
                        let mut data = json!({
                            "verdict": verdict,
                            "requires_more_work": verdict.requires_more_work,
                        });
                        if verdict.requires_more_work {
                            *review_demands_work = true;
                            data["instruction"] = Value::String(verdict.continuation());
                        }
                        ControlStep::Result(ToolResult::ok(data))
                    }
                    Err(e) => {
                        warn!(session = session.id(), error = %e, "review failed");
                        ControlStep::Result(ToolResult::err(format!("review failed: {e}")))
                    }
                }
            }
            ControlCall::FinalResponse { .. } if *review_demands_work => {
                info!(session = session.id(), "final_response refused, review requires more work");
                ControlStep::Result(ToolResult::err(
                    "review requires more work: fix the must-fix items and request another review first",
                ))
            }
            ControlCall::FinalResponse {
                message,
                summary,
                next_steps,
            } => ControlStep::Finish(TerminalPayload {
                message,
                summary,
                next_steps,
            }),
        }
    }

    fn emit_call(&self, session: &ConversationSession, call: &ToolCall) {
        session.emit(
            EventKind::ToolCall,
            json!({ "id": call.id, "name": call.tool_name, "arguments": call.arguments }),
        );
    }

    /// Emit the full result, then append the (possibly truncated) tool message.
    fn record_result(&self, session: &ConversationSession, call: &ToolCall, result: &ToolResult) {
        let mut data = json!({ "id": call.id, "name": call.tool_name, "success": result.success });
        if let Some(value) = &result.data {
            data["data"] = value.clone();
        }
        if let Some(err) = &result.error {
            data["error"] = Value::String(err.clone());
        }
        session.emit(EventKind::ToolResult, data);

        let content = truncate_tool_result(&result.to_model_text(), self.config.tool_result_max_tokens);
        session.push_message(Message::tool_result(call.id.clone(), result, content));
    }

    /// A turn without tool calls ends the run. A legacy JSON completion
    /// payload in the text is honored; anything else is a plain answer.
    fn finish_without_tools(&self, session: &ConversationSession, content: String) -> TerminalPayload {
        match fallback::parse_terminal(&content) {
            Some(payload) => {
                debug!(session = session.id(), "completion payload found in free text");
                payload
            }
            None => TerminalPayload::from_text(content),
        }
    }

    fn complete(&self, session: &ConversationSession, payload: TerminalPayload, iterations: u32) -> RunOutcome {
        session.push_message(Message::text(Role::Assistant, payload.message.clone()));
        session.transition(SessionStatus::Complete);
        session.emit(
            EventKind::Complete,
            json!({
                "message": payload.message,
                "summary": payload.summary,
                "next_steps": payload.next_steps,
                "iterations": iterations,
            }),
        );
        info!(session = session.id(), iterations, "run complete");
        RunOutcome {
            status: SessionStatus::Complete,
            iterations,
            message: Some(payload.message),
            error: None,
        }
    }

    fn halt(&self, session: &ConversationSession, halt: Halt, iterations: u32) -> RunOutcome {
        let (error, kind) = match halt {
            Halt::Cancelled => ("cancelled".to_string(), "cancelled"),
            Halt::Failed { error, kind } => (error, kind),
        };
        error!(session = session.id(), iterations, kind, error = %error, "run stopped");
        session.transition(SessionStatus::Idle);
        session.emit(
            EventKind::Error,
            json!({ "error": error, "kind": kind, "iteration": iterations }),
        );
        RunOutcome {
            status: SessionStatus::Idle,
            iterations,
            message: None,
            error: Some(error),
        }
    }
}
