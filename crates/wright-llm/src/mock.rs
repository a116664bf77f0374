//! Mock LLM provider for deterministic testing.
//!
//! Returns pre-configured responses without making any HTTP calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

use crate::provider::*;
use wright_core::{Message, Result, ToolCall, WrightError};

/// A mock LLM provider that returns queued responses in order.
///
/// # Example
/// ```
/// use wright_llm::mock::MockProvider;
/// let provider = MockProvider::new("mock")
///     .with_response("Hello, world!");
/// ```
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    /// Every request received, for assertions in tests.
    requests: Arc<Mutex<Vec<LlmRequest>>>,
    /// Response replayed when the queue is empty.
    fallback: Mutex<Option<MockResponse>>,
    call_seq: AtomicUsize,
    name: String,
}

/// What a mock call should fail with.
#[derive(Clone, Debug)]
pub enum MockFailure {
    /// A plain provider failure with this message.
    Provider(String),
    /// A rate limit with the given retry hint.
    RateLimited { retry_after_secs: u64 },
}

/// A pre-configured response from the mock provider.
#[derive(Clone, Debug)]
pub struct MockResponse {
    pub text: String,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
    pub failure: Option<MockFailure>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            text: String::new(),
            thinking: None,
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
                ..Default::default()
            },
            failure: None,
        }
    }
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    /// A turn carrying the given tool calls. Ids are kept as given.
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            stop_reason: StopReason::ToolUse,
            ..Default::default()
        }
    }

    pub fn error(msg: &str) -> Self {
        Self {
            failure: Some(MockFailure::Provider(msg.to_string())),
            ..Default::default()
        }
    }

    pub fn rate_limited() -> Self {
        Self {
            failure: Some(MockFailure::RateLimited { retry_after_secs: 0 }),
            ..Default::default()
        }
    }
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Arc::new(Mutex::new(vec![])),
            fallback: Mutex::new(None),
            call_seq: AtomicUsize::new(0),
            name: name.into(),
        }
    }

    /// Queue a simple text response.
    pub fn with_response(self, text: &str) -> Self {
        self.with_mock_response(MockResponse::text(text))
    }

    /// Queue a single tool call. The call id is `call_<n>`, numbered in
    /// queue order starting at 1.
    pub fn with_tool_call(self, name: &str, args: serde_json::Value) -> Self {
        self.with_tool_calls(vec![(name, args)])
    }

    /// Queue one turn with several tool calls, ids numbered as in
    /// [`MockProvider::with_tool_call`].
    pub fn with_tool_calls(self, calls: Vec<(&str, serde_json::Value)>) -> Self {
        let calls = calls
            .into_iter()
            .map(|(name, args)| ToolCall {
                id: format!("call_{}", self.call_seq.fetch_add(1, Ordering::Relaxed) + 1),
                tool_name: name.to_string(),
                arguments: args,
            })
            .collect();
        self.with_mock_response(MockResponse::tool_calls(calls))
    }

    pub fn with_error(self, error: &str) -> Self {
        self.with_mock_response(MockResponse::error(error))
    }

    pub fn with_rate_limit(self) -> Self {
        self.with_mock_response(MockResponse::rate_limited())
    }

    pub fn with_mock_response(self, resp: MockResponse) -> Self {
        self.responses.lock().push_back(resp);
        self
    }

    /// Replay `resp` forever once the queue runs dry.
    pub fn with_fallback(self, resp: MockResponse) -> Self {
        *self.fallback.lock() = Some(resp);
        self
    }

    pub fn queue_response(&self, resp: MockResponse) {
        self.responses.lock().push_back(resp);
    }

    /// Snapshot of all requests made so far.
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }

    fn next_response(&self, request: &LlmRequest) -> MockResponse {
        self.requests.lock().push(request.clone());
        if let Some(resp) = self.responses.lock().pop_front() {
            return resp;
        }
        self.fallback
            .lock()
            .clone()
            .unwrap_or_else(|| MockResponse::text("(mock: no more queued responses)"))
    }
}

fn into_error(failure: MockFailure) -> WrightError {
    match failure {
        MockFailure::Provider(msg) => WrightError::LlmProvider(msg),
        MockFailure::RateLimited { retry_after_secs } => WrightError::RateLimited { retry_after_secs },
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> Vec<String> {
        vec!["test-model".to_string()]
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let mock = self.next_response(request);
        if let Some(failure) = mock.failure {
            return Err(into_error(failure));
        }
        Ok(LlmResponse {
            message: Message::assistant_tool_calls(mock.text, mock.tool_calls),
            thinking: mock.thinking,
            usage: mock.usage,
            stop_reason: mock.stop_reason,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> Result<mpsc::Receiver<StreamChunk>> {
        let mock = self.next_response(request);
        let (tx, rx) = mpsc::channel(64);

        // Rate limits surface mid-stream, the way an SSE error event would.
        match mock.failure {
            Some(MockFailure::RateLimited { .. }) => {
                tokio::spawn(async move {
                    let _ = tx.send(StreamChunk::Error("HTTP 429: rate limited".into())).await;
                });
                return Ok(rx);
            }
            Some(failure) => return Err(into_error(failure)),
            None => {}
        }

        tokio::spawn(async move {
            if let Some(thinking) = mock.thinking {
                let _ = tx.send(StreamChunk::Thinking(thinking)).await;
            }
            let words: Vec<&str> = mock.text.split_inclusive(' ').collect();
            for word in words {
                let _ = tx.send(StreamChunk::TextDelta(word.to_string())).await;
            }
            for tc in mock.tool_calls {
                let _ = tx.send(StreamChunk::ToolCall(tc)).await;
            }
            let _ = tx.send(StreamChunk::Usage(mock.usage)).await;
            let _ = tx.send(StreamChunk::Done(mock.stop_reason)).await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
