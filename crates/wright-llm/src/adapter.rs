//! The single entry point the orchestration loop uses to talk to a model.
//!
//! `generate` always resolves once with the aggregated turn, whether the
//! backend was called in blocking or streaming mode. Partial text and
//! thinking deltas go out on a separate broadcast channel that nobody is
//! required to read.

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use wright_core::{Message, Result, ToolCall, ToolSpec, WrightError};

use crate::provider::{LlmRequest, LlmResponse, StopReason, StreamChunk, Usage, classify_error};
use crate::router::ModelRouter;

/// A partial-output event published while a streamed turn is in flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Delta {
    Text(String),
    Thinking(String),
}

/// The aggregated result of one model turn.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub content: String,
    /// Tool calls in the order the model emitted them, ids untouched.
    pub tool_calls: Vec<ToolCall>,
    pub thinking: Option<String>,
    pub usage: Usage,
    pub stop_reason: Option<StopReason>,
}

impl Generation {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

impl From<LlmResponse> for Generation {
    fn from(resp: LlmResponse) -> Self {
        Self {
            content: resp.message.text_content(),
            tool_calls: resp.message.tool_calls,
            thinking: resp.thinking,
            usage: resp.usage,
            stop_reason: Some(resp.stop_reason),
        }
    }
}

/// Generation parameters.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub model: String,
    pub fallback_model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4-20250514".into(),
            fallback_model: None,
            max_tokens: 8192,
            temperature: 0.2,
            stream: true,
        }
    }
}

/// Normalizes backend calls into [`Generation`]s.
pub struct ProviderAdapter {
    router: ModelRouter,
    settings: AdapterSettings,
    deltas: broadcast::Sender<Delta>,
}

impl ProviderAdapter {
    pub fn new(router: ModelRouter, settings: AdapterSettings) -> Self {
        let (deltas, _) = broadcast::channel(512);
        Self {
            router,
            settings,
            deltas,
        }
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    /// Live partial output. Lagging receivers lose deltas, never turns.
    pub fn subscribe_deltas(&self) -> broadcast::Receiver<Delta> {
        self.deltas.subscribe()
    }

    /// One turn against the configured model, streamed or blocking per settings.
    pub async fn generate(
        &self,
        system: Option<&str>,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Generation> {
        let request = LlmRequest {
            model: self.settings.model.clone(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            system: system.map(str::to_string),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            stream: self.settings.stream,
        };
        self.exchange(request).await
    }

    /// A single non-streamed, tool-less turn against `model`.
    pub async fn complete_once(
        &self,
        model: &str,
        system: &str,
        messages: &[Message],
        max_tokens: u32,
    ) -> Result<Generation> {
        let request = LlmRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: vec![],
            system: Some(system.to_string()),
            max_tokens,
            temperature: 0.0,
            stream: false,
        };
        self.exchange(request).await
    }

    async fn exchange(&self, request: LlmRequest) -> Result<Generation> {
        let fallback = self.settings.fallback_model.as_deref();
        debug!(model = %request.model, stream = request.stream, messages = request.messages.len(), "generating");
        if request.stream {
            let rx = self.router.stream(&request, fallback).await?;
            self.aggregate(rx).await
        } else {
            self.router.complete(&request, fallback).await.map(Generation::from)
        }
    }

    async fn aggregate(&self, mut rx: mpsc::Receiver<StreamChunk>) -> Result<Generation> {
        let mut generation = Generation::default();
        let mut thinking = String::new();

        while let Some(chunk) = rx.recv().await {
            match chunk {
                StreamChunk::TextDelta(text) => {
                    generation.content.push_str(&text);
                    let _ = self.deltas.send(Delta::Text(text));
                }
                StreamChunk::Thinking(text) => {
                    thinking.push_str(&text);
                    let _ = self.deltas.send(Delta::Thinking(text));
                }
                StreamChunk::ToolCall(call) => generation.tool_calls.push(call),
                StreamChunk::Usage(usage) => generation.usage.merge(&usage),
                StreamChunk::Done(reason) => {
                    generation.stop_reason = Some(reason);
                    break;
                }
                StreamChunk::Error(message) => return Err(classify_error(message)),
            }
        }

        if generation.stop_reason.is_none() {
            return Err(WrightError::LlmProvider("stream closed before completion".into()));
        }
        if !thinking.is_empty() {
            generation.thinking = Some(thinking);
        }
        Ok(generation)
    }
}
