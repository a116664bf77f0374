use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wright_core::{Message, MessageContent, Result, Role, ToolCall, WrightError};

use crate::provider::*;
use crate::sse::SseBuffer;

/// OpenAI-compatible Chat Completions backend (OpenAI, Azure, vLLM, ...).
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    provider_name: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            provider_name: "openai".into(),
        }
    }

    /// Use a custom base URL and provider name.
    pub fn with_base_url(mut self, url: String, name: String) -> Self {
        self.base_url = url;
        self.provider_name = name;
        self
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
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

fn wire_messages(request: &LlmRequest) -> Vec<Value> {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }

    for msg in &request.messages {
        match msg.role {
            Role::System => messages.push(json!({"role": "system", "content": msg.text_content()})),
            Role::User => messages.push(json!({"role": "user", "content": msg.text_content()})),
            Role::Assistant if msg.tool_calls.is_empty() => {
                messages.push(json!({"role": "assistant", "content": msg.text_content()}))
            }
            Role::Assistant => {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.tool_name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                let text = msg.text_content();
                let content = if text.is_empty() { Value::Null } else { json!(text) };
                messages.push(json!({
                    "role": "assistant",
                    "content": content,
                    "tool_calls": calls,
                }));
            }
            Role::Tool => {
                let mut any = false;
                for block in &msg.content {
                    if let MessageContent::ToolResult { tool_call_id, content, .. } = block {
                        any = true;
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_call_id,
                            "content": content,
                        }));
                    }
                }
                if !any {
                    messages.push(json!({"role": "user", "content": msg.text_content()}));
                }
            }
        }
    }
    messages
}

pub(crate) fn build_request_body(request: &LlmRequest, stream: bool) -> Value {
    let mut body = json!({
        "model": &request.model,
        "temperature": request.temperature,
        "messages": wire_messages(request),
    });

    // Reasoning models (o1, o3, gpt-5, ...) require max_completion_tokens.
    if uses_max_completion_tokens(&request.model) {
        body["max_completion_tokens"] = json!(request.max_tokens);
    } else {
        body["max_tokens"] = json!(request.max_tokens);
    }

    if stream {
        body["stream"] = json!(true);
        body["stream_options"] = json!({"include_usage": true});
    }

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    body
}

fn finish_reason(raw: Option<&str>, has_tool_calls: bool) -> StopReason {
    match raw {
        Some("length") => StopReason::MaxTokens,
        Some("content_filter") => StopReason::ContentFilter,
        _ if has_tool_calls => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

fn usage_from(data: &Value) -> Usage {
    Usage {
        input_tokens: data["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: data["completion_tokens"].as_u64().unwrap_or(0) as u32,
        cache_read_tokens: data["prompt_tokens_details"]["cached_tokens"]
            .as_u64()
            .unwrap_or(0) as u32,
        cache_write_tokens: 0,
    }
}

pub(crate) fn parse_response(data: &Value) -> LlmResponse {
    let choice = &data["choices"][0];
    let content = choice["message"]["content"].as_str().unwrap_or_default();

    let tool_calls: Vec<ToolCall> = choice["message"]["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    let name = c["function"]["name"].as_str()?.to_string();
                    let raw = c["function"]["arguments"].as_str().unwrap_or_default();
                    Some(ToolCall {
                        id: c["id"].as_str()?.to_string(),
                        arguments: parse_tool_arguments(&name, raw),
                        tool_name: name,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let stop_reason = finish_reason(choice["finish_reason"].as_str(), !tool_calls.is_empty());
    LlmResponse {
        message: Message::assistant_tool_calls(content, tool_calls),
        thinking: choice["message"]["reasoning_content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        usage: usage_from(&data["usage"]),
        stop_reason,
    }
}

/// Tool-call fragments keyed by their stream index, so calls come out in the
/// order the model emitted them.
#[derive(Default)]
struct StreamState {
    calls: BTreeMap<u64, (String, String, String)>,
    reason: Option<String>,
    usage: Usage,
}

impl StreamState {
    fn on_event(&mut self, event: &Value, out: &mut Vec<StreamChunk>) {
        let delta = &event["choices"][0]["delta"];
        if let Some(text) = delta["content"].as_str()
            && !text.is_empty()
        {
            out.push(StreamChunk::TextDelta(text.to_string()));
        }
        if let Some(text) = delta["reasoning_content"].as_str()
            && !text.is_empty()
        {
            out.push(StreamChunk::Thinking(text.to_string()));
        }
        if let Some(tcs) = delta["tool_calls"].as_array() {
            for tc in tcs {
                let idx = tc["index"].as_u64().unwrap_or(0);
                let entry = self.calls.entry(idx).or_default();
                if let Some(id) = tc["id"].as_str() {
                    entry.0 = id.to_string();
                }
                if let Some(name) = tc["function"]["name"].as_str() {
                    entry.1.push_str(name);
                }
                if let Some(args) = tc["function"]["arguments"].as_str() {
                    entry.2.push_str(args);
                }
            }
        }
        if let Some(fr) = event["choices"][0]["finish_reason"].as_str() {
            self.reason = Some(fr.to_string());
        }
        if event["usage"].is_object() {
            self.usage = usage_from(&event["usage"]);
        }
    }

    /// The body closed without `[DONE]`. Some compatible servers skip the
    /// sentinel, so a stream that already reported a finish reason still
    /// completes; anything else was cut short.
    fn on_eof(self, out: &mut Vec<StreamChunk>) {
        if self.reason.is_some() {
            self.finish(out);
        } else {
            warn!(pending_calls = self.calls.len(), "stream ended before a finish reason");
            out.push(StreamChunk::Error("stream ended before a finish reason".into()));
        }
    }

    fn finish(self, out: &mut Vec<StreamChunk>) {
        let has_calls = !self.calls.is_empty();
        for (_, (id, name, args)) in self.calls {
            out.push(StreamChunk::ToolCall(ToolCall {
                id,
                arguments: parse_tool_arguments(&name, &args),
                tool_name: name,
            }));
        }
        out.push(StreamChunk::Usage(self.usage));
        out.push(StreamChunk::Done(finish_reason(self.reason.as_deref(), has_calls)));
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn models(&self) -> Vec<String> {
        vec![
            "gpt-4o".into(),
            "gpt-4o-mini".into(),
            "o3".into(),
            "o3-mini".into(),
        ]
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = build_request_body(request, false);
        debug!(provider = %self.provider_name, model = %request.model, "sending chat completion");
        let resp = self.post(&body).await?;
        let data: Value = resp
            .json()
            .await
            .map_err(|e| WrightError::LlmProvider(e.to_string()))?;
        Ok(parse_response(&data))
    }

    async fn stream(&self, request: &LlmRequest) -> Result<mpsc::Receiver<StreamChunk>> {
        let body = build_request_body(request, true);
        debug!(provider = %self.provider_name, model = %request.model, "opening chat completion stream");
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
                    if data == "[DONE]" {
                        state.finish(&mut out);
                        for c in out.drain(..) {
                            let _ = tx.send(c).await;
                        }
                        return;
                    }
                    let Ok(event) = serde_json::from_str::<Value>(&data) else {
                        continue;
                    };
                    if let Some(err) = event.get("error") {
                        let msg = err["message"].as_str().unwrap_or("unknown error");
                        let kind = err["type"].as_str().unwrap_or("error");
                        let _ = tx.send(StreamChunk::Error(format!("{kind}: {msg}"))).await;
                        return;
                    }
                    state.on_event(&event, &mut out);
                    for c in out.drain(..) {
                        if tx.send(c).await.is_err() {
                            return;
                        }
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
        info!(provider = %self.provider_name, "checking API credentials");
        if self.api_key.is_empty() {
            return Err(WrightError::LlmProvider(format!(
                "{} API key not set",
                self.provider_name
            )));
        }
        Ok(())
    }
}

/// Returns true for models that require `max_completion_tokens` instead of `max_tokens`.
fn uses_max_completion_tokens(model: &str) -> bool {
    let m = model.to_lowercase();
    m.starts_with("o1") || m.starts_with("o3") || m.starts_with("o4") || m.contains("gpt-5")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wright_core::ToolResult;

    #[test]
    fn test_body_shapes_tool_round_trip() {
        let call = ToolCall {
            id: "call_a".into(),
            tool_name: "read_file".into(),
            arguments: json!({"path": "x"}),
        };
        let request = LlmRequest {
            model: "o3-mini".into(),
            messages: vec![
                Message::text(Role::User, "go"),
                Message::assistant_tool_calls("", vec![call]),
                Message::tool_result("call_a", &ToolResult::ok(json!("data")), "data".into()),
            ],
            tools: vec![],
            system: Some("sys".into()),
            max_tokens: 64,
            temperature: 0.0,
            stream: true,
        };
        let body = build_request_body(&request, true);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[2]["tool_calls"][0]["function"]["arguments"], "{\"path\":\"x\"}");
        assert_eq!(messages[3]["tool_call_id"], "call_a");
        assert_eq!(body["max_completion_tokens"], 64);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_parse_response_with_malformed_arguments() {
        let data = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        {"id": "c1", "function": {"name": "list_files", "arguments": "{\"dir\": \"src\"}"}},
                        {"id": "c2", "function": {"name": "read_file", "arguments": "{not json"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4}
        });
        let resp = parse_response(&data);
        assert_eq!(resp.message.tool_calls.len(), 2);
        assert_eq!(resp.message.tool_calls[0].arguments, json!({"dir": "src"}));
        assert_eq!(resp.message.tool_calls[1].arguments, json!({}));
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert_eq!(resp.usage.total_tokens(), 7);
    }

    #[test]
    fn test_stream_state_emits_calls_in_index_order() {
        let mut state = StreamState::default();
        let mut out = Vec::new();
        state.on_event(
            &json!({"choices": [{"delta": {"tool_calls": [
                {"index": 1, "id": "second", "function": {"name": "b", "arguments": "{}"}},
                {"index": 0, "id": "first", "function": {"name": "a", "arguments": "{\"k\":"}}
            ]}}]}),
            &mut out,
        );
        state.on_event(
            &json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "1}"}}
            ]}, "finish_reason": "tool_calls"}]}),
            &mut out,
        );
        assert!(out.is_empty());
        state.finish(&mut out);

        let ids: Vec<String> = out
            .iter()
            .filter_map(|c| match c {
                StreamChunk::ToolCall(tc) => Some(tc.id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["first", "second"]);
        match &out[0] {
            StreamChunk::ToolCall(tc) => assert_eq!(tc.arguments, json!({"k": 1})),
            other => panic!("unexpected chunk {other:?}"),
        }
        assert!(matches!(out.last(), Some(StreamChunk::Done(StopReason::ToolUse))));
    }

    #[test]
    fn test_stream_without_finish_reason_is_an_error() {
        let mut state = StreamState::default();
        let mut out = Vec::new();
        state.on_event(&json!({"choices": [{"delta": {"content": "Half a sen"}}]}), &mut out);
        out.clear();
        state.on_eof(&mut out);
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], StreamChunk::Error(msg) if msg == "stream ended before a finish reason"));

        let mut state = StreamState::default();
        state.on_event(
            &json!({"choices": [{"delta": {"content": "All done"}, "finish_reason": "stop"}]}),
            &mut out,
        );
        out.clear();
        state.on_eof(&mut out);
        assert!(matches!(out.last(), Some(StreamChunk::Done(StopReason::EndTurn))));
    }
}
