use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wright_core::{Message, MessageContent, Result, Role, ToolCall, WrightError};

use crate::provider::*;
use crate::sse::SseBuffer;

const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API backend.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.anthropic.com/v1".into(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| WrightError::LlmProvider(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status.as_u16() == 429 {
            return Err(WrightError::RateLimited {
                retry_after_secs: retry_after_secs(resp.headers()),
            });
        }
        let text = resp.text().await.unwrap_or_default();
        Err(WrightError::LlmProvider(format!("HTTP {status}: {text}")))
    }
}

/// Translate history into Anthropic's message format. Tool results travel as
/// user messages holding `tool_result` blocks; consecutive results are merged
/// into one user turn as the API requires.
pub(crate) fn build_request_body(request: &LlmRequest) -> Value {
    let mut messages: Vec<Value> = Vec::new();
    for msg in &request.messages {
        match msg.role {
            Role::System => continue,
            Role::User => messages.push(json!({
                "role": "user",
                "content": msg.text_content(),
            })),
            Role::Assistant if msg.tool_calls.is_empty() => messages.push(json!({
                "role": "assistant",
                "content": msg.text_content(),
            })),
            Role::Assistant => {
                let mut blocks = Vec::new();
                let text = msg.text_content();
                if !text.is_empty() {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                for tc in &msg.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.tool_name,
                        "input": tc.arguments,
                    }));
                }
                messages.push(json!({"role": "assistant", "content": blocks}));
            }
            Role::Tool => {
                let blocks: Vec<Value> = msg
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        MessageContent::ToolResult {
                            tool_call_id,
                            content,
                            is_error,
                        } => Some(json!({
                            "type": "tool_result",
                            "tool_use_id": tool_call_id,
                            "content": content,
                            "is_error": is_error,
                        })),
                        _ => None,
                    })
                    .collect();
                if blocks.is_empty() {
                    messages.push(json!({"role": "user", "content": msg.text_content()}));
                    continue;
                }
                let previous = messages
                    .last_mut()
                    .filter(|last| last["role"] == "user")
                    .and_then(|last| last["content"].as_array_mut())
                    .filter(|c| c.iter().all(|b| b["type"] == "tool_result"));
                match previous {
                    Some(results) => results.extend(blocks),
                    None => messages.push(json!({"role": "user", "content": blocks})),
                }
            }
        }
    }

    let mut body = json!({
        "model": &request.model,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "messages": messages,
    });

    if let Some(system) = &request.system {
        body["system"] = json!(system);
    }

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

fn stop_reason(raw: Option<&str>) -> StopReason {
    match raw {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

fn usage_from(data: &Value) -> Usage {
    let n = |key: &str| data[key].as_u64().unwrap_or(0) as u32;
    Usage {
        input_tokens: n("input_tokens"),
        output_tokens: n("output_tokens"),
        cache_read_tokens: n("cache_read_input_tokens"),
        cache_write_tokens: n("cache_creation_input_tokens"),
    }
}

/// Parse a blocking Messages API response body.
pub(crate) fn parse_response(data: &Value) -> LlmResponse {
    let blocks = data["content"].as_array().cloned().unwrap_or_default();

    let mut text = String::new();
    let mut thinking = String::new();
    let mut tool_calls = Vec::new();
    for b in &blocks {
        match b["type"].as_str() {
            Some("text") => text.push_str(b["text"].as_str().unwrap_or_default()),
            Some("thinking") => thinking.push_str(b["thinking"].as_str().unwrap_or_default()),
            Some("tool_use") => {
                let name = b["name"].as_str().unwrap_or_default().to_string();
                let arguments = if b["input"].is_object() {
                    b["input"].clone()
                } else {
                    parse_tool_arguments(&name, &b["input"].to_string())
                };
                tool_calls.push(ToolCall {
                    id: b["id"].as_str().unwrap_or_default().to_string(),
                    tool_name: name,
                    arguments,
                });
            }
            _ => {}
        }
    }

    LlmResponse {
        message: Message::assistant_tool_calls(text, tool_calls),
        thinking: (!thinking.is_empty()).then_some(thinking),
        usage: usage_from(&data["usage"]),
        stop_reason: stop_reason(data["stop_reason"].as_str()),
    }
}

/// Incremental state of one streamed response.
#[derive(Default)]
struct StreamState {
    tool_id: String,
    tool_name: String,
    tool_input: String,
    in_tool: bool,
    saw_tool: bool,
    usage: Usage,
    stop: Option<StopReason>,
}

impl StreamState {
    /// Translate one SSE event. Returns `true` once the message is finished.
    fn on_event(&mut self, event: &Value, out: &mut Vec<StreamChunk>) -> bool {
        match event["type"].as_str() {
            Some("message_start") => {
                self.usage = usage_from(&event["message"]["usage"]);
            }
            Some("content_block_start") => {
                let cb = &event["content_block"];
                if cb["type"] == "tool_use" {
                    self.tool_id = cb["id"].as_str().unwrap_or_default().to_string();
                    self.tool_name = cb["name"].as_str().unwrap_or_default().to_string();
                    self.tool_input.clear();
                    self.in_tool = true;
                }
            }
            Some("content_block_delta") => {
                let delta = &event["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        if let Some(text) = delta["text"].as_str() {
                            out.push(StreamChunk::TextDelta(text.to_string()));
                        }
                    }
                    Some("thinking_delta") => {
                        if let Some(text) = delta["thinking"].as_str() {
                            out.push(StreamChunk::Thinking(text.to_string()));
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(partial) = delta["partial_json"].as_str() {
                            self.tool_input.push_str(partial);
                        }
                    }
                    _ => {}
                }
            }
            Some("content_block_stop") if self.in_tool => {
                out.push(StreamChunk::ToolCall(ToolCall {
                    id: std::mem::take(&mut self.tool_id),
                    arguments: parse_tool_arguments(&self.tool_name, &self.tool_input),
                    tool_name: std::mem::take(&mut self.tool_name),
                }));
                self.in_tool = false;
                self.saw_tool = true;
            }
            Some("message_delta") => {
                if let Some(sr) = event["delta"]["stop_reason"].as_str() {
                    self.stop = Some(stop_reason(Some(sr)));
                }
                if let Some(ot) = event["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = ot as u32;
                }
            }
            Some("message_stop") => {
                out.push(StreamChunk::Usage(self.usage.clone()));
                out.push(StreamChunk::Done(self.final_stop()));
                return true;
            }
            Some("error") => {
                let kind = event["error"]["type"].as_str().unwrap_or("error");
                let msg = event["error"]["message"].as_str().unwrap_or("unknown error");
                out.push(StreamChunk::Error(format!("{kind}: {msg}")));
                return true;
            }
            _ => {}
        }
        false
    }

    /// The body closed without `message_stop`, so the reply may be cut
    /// short. Surface it as an error rather than a finished turn.
    fn on_eof(&self, out: &mut Vec<StreamChunk>) {
        warn!(saw_tool = self.saw_tool, in_tool = self.in_tool, "stream ended before message_stop");
        out.push(StreamChunk::Error("stream ended before message_stop".into()));
    }

    fn final_stop(&self) -> StopReason {
        if self.saw_tool {
            StopReason::ToolUse
        } else {
            self.stop.unwrap_or(StopReason::EndTurn)
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn models(&self) -> Vec<String> {
        vec![
            "claude-opus-4-20250514".into(),
            "claude-sonnet-4-20250514".into(),
            "claude-3-5-haiku-latest".into(),
        ]
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = build_request_body(request);
        debug!(model = %request.model, "sending Anthropic request");
        let resp = self.post(&body).await?;
        let data: Value = resp
            .json()
            .await
            .map_err(|e| WrightError::LlmProvider(e.to_string()))?;
        Ok(parse_response(&data))
    }

    async fn stream(&self, request: &LlmRequest) -> Result<mpsc::Receiver<StreamChunk>> {
        let mut body = build_request_body(request);
        body["stream"] = json!(true);
        debug!(model = %request.model, "opening Anthropic stream");
        let resp = self.post(&body).await?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut bytes = resp.bytes_stream();
            let mut sse = SseBuffer::default();
            let mut state = StreamState::default();
            let mut out = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(StreamChunk::Error(e.to_string())).await;
                        return;
                    }
                };
                for data in sse.push(&chunk) {
                    let Ok(event) = serde_json::from_str::<Value>(&data) else {
                        continue;
                    };
                    let finished = state.on_event(&event, &mut out);
                    for c in out.drain(..) {
                        if tx.send(c).await.is_err() {
                            return;
                        }
                    }
                    if finished {
                        return;
                    }
                }
            }
            state.on_eof(&mut out);
            for c in out {
                let _ = tx.send(c).await;
            }
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<()> {
        info!("checking Anthropic credentials");
        if self.api_key.is_empty() {
            return Err(WrightError::LlmProvider("ANTHROPIC_API_KEY not set".into()));
        }
        Ok(())
    }
}
