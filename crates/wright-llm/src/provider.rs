use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use wright_core::{Message, Result, ToolCall, ToolSpec, WrightError};

/// A request to an LLM backend.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// The model to use. The router strips the "provider/" prefix before the
    /// request reaches a backend.
    pub model: String,
    /// Conversation history, oldest first.
    pub messages: Vec<Message>,
    /// Tools the model may call.
    pub tools: Vec<ToolSpec>,
    /// System prompt (separate from messages for providers that support it).
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

/// A complete (non-streaming) response from a backend.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Assistant message; tool calls are in `message.tool_calls`.
    pub message: Message,
    /// Reasoning text, for backends that expose it.
    pub thinking: Option<String>,
    pub usage: Usage,
    pub stop_reason: StopReason,
}

impl LlmResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.message.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    ContentFilter,
}

/// A chunk of a streaming response.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Thinking / reasoning text.
    Thinking(String),
    /// Content text delta.
    TextDelta(String),
    /// A fully assembled tool call.
    ToolCall(ToolCall),
    /// Usage stats (sent at end of stream).
    Usage(Usage),
    /// Stream is done.
    Done(StopReason),
    /// An error occurred mid-stream.
    Error(String),
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_write_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }
}

/// Trait implemented by each LLM backend (Anthropic, OpenAI, mock).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short lowercase name used as the model prefix, e.g. "anthropic".
    fn name(&self) -> &str;

    /// Known model names, used when a model string has no provider prefix.
    fn models(&self) -> Vec<String>;

    /// Send a non-streaming request.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Send a streaming request. Returns a receiver for chunks.
    async fn stream(
        &self,
        request: &LlmRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamChunk>>;

    /// Check if this provider is usable (credentials present, reachable).
    async fn health_check(&self) -> Result<()>;
}

/// Classify a backend error message. HTTP 429 and rate-limit wording become
/// [`WrightError::RateLimited`] with no retry hint; everything else is a
/// plain provider failure.
pub fn classify_error(message: impl Into<String>) -> WrightError {
    let message = message.into();
    let lower = message.to_lowercase();
    let status_429 = ["http 429", "status 429", "status: 429", "status code 429", "429 too many"]
        .iter()
        .any(|phrase| lower.contains(phrase));
    if status_429
        || lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
    {
        WrightError::RateLimited { retry_after_secs: 0 }
    } else {
        WrightError::LlmProvider(message)
    }
}

/// Decode tool-call arguments. Malformed JSON degrades to an empty object so
/// the call can still be attempted.
pub fn parse_tool_arguments(tool: &str, raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => value,
        Ok(other) => {
            warn!(tool = %tool, arguments = %other, "tool arguments are not an object, using {{}}");
            serde_json::json!({})
        }
        Err(e) => {
            warn!(tool = %tool, error = %e, raw = %raw, "malformed tool arguments, using {{}}");
            serde_json::json!({})
        }
    }
}

/// Parse a `Retry-After` header value given in seconds.
pub(crate) fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit_messages() {
        assert!(classify_error("HTTP 429 Too Many Requests").is_rate_limited());
        assert!(classify_error("Rate limit exceeded for org").is_rate_limited());
        assert!(classify_error("{\"type\":\"rate_limit_error\"}").is_rate_limited());
        assert!(!classify_error("HTTP 500: internal").is_rate_limited());
    }

    #[test]
    fn test_incidental_429_is_not_a_rate_limit() {
        assert!(!classify_error("request id 4291 failed").is_rate_limited());
        assert!(!classify_error("HTTP 500: upstream req_429a7 timed out").is_rate_limited());
        assert!(classify_error("HTTP 429: rate limited").is_rate_limited());
        assert!(classify_error("upstream returned status 429").is_rate_limited());
    }

    #[test]
    fn test_parse_tool_arguments_degrades_to_empty_object() {
        assert_eq!(
            parse_tool_arguments("t", r#"{"path":"a"}"#),
            serde_json::json!({"path": "a"})
        );
        assert_eq!(parse_tool_arguments("t", "{\"path\": "), serde_json::json!({}));
        assert_eq!(parse_tool_arguments("t", "[1,2]"), serde_json::json!({}));
        assert_eq!(parse_tool_arguments("t", ""), serde_json::json!({}));
    }

    #[test]
    fn test_usage_merge() {
        let mut a = Usage { input_tokens: 10, output_tokens: 5, ..Default::default() };
        a.merge(&Usage { input_tokens: 1, output_tokens: 2, ..Default::default() });
        assert_eq!(a.total_tokens(), 18);
    }
}
