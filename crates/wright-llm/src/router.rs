use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::provider::{LlmProvider, LlmRequest, LlmResponse, StreamChunk};
use wright_core::{Result, WrightError};

/// Retry attempts for transient failures (5xx, timeouts).
const MAX_RETRIES: u32 = 3;
/// Base delay for exponential backoff (doubles each retry).
const BASE_DELAY_MS: u64 = 1000;

// ── Circuit Breaker ────────────────────────────────────────────

/// Consecutive failures before the circuit opens.
const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
/// How long the circuit stays open before a probe request is allowed.
const CIRCUIT_OPEN_DURATION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    /// One probe request is in flight.
    HalfOpen,
}

#[derive(Debug)]
struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
        }
    }

    fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open { since } if since.elapsed() >= CIRCUIT_OPEN_DURATION => {
                self.state = CircuitState::HalfOpen;
                true
            }
            CircuitState::Open { .. } | CircuitState::HalfOpen => false,
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= CIRCUIT_FAILURE_THRESHOLD
            || self.state == CircuitState::HalfOpen
        {
            self.state = CircuitState::Open {
                since: Instant::now(),
            };
        }
    }

    fn is_open(&self) -> bool {
        matches!(self.state, CircuitState::Open { .. })
    }
}

/// Routes "provider/model" strings to registered backends, retrying transient
/// failures and failing over to a fallback model.
///
/// Rate limits are never retried here. They are returned to the caller as
/// [`WrightError::RateLimited`] so the orchestration loop applies its own
/// backoff policy.
#[derive(Clone)]
pub struct ModelRouter {
    providers: Vec<Arc<dyn LlmProvider>>,
    breakers: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
    max_retries: u32,
    base_delay: Duration,
}

/// Transient, non-rate-limit failures worth retrying.
fn is_retryable(err: &WrightError) -> bool {
    match err {
        WrightError::LlmProvider(msg) => {
            msg.starts_with("HTTP 500")
                || msg.starts_with("HTTP 502")
                || msg.starts_with("HTTP 503")
                || msg.starts_with("HTTP 529")
                || msg.contains("timed out")
                || msg.contains("connection reset")
                || msg.contains("connection closed")
                || msg.contains("overloaded")
        }
        _ => false,
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRouter {
    pub fn new() -> Self {
        Self {
            providers: vec![],
            breakers: Arc::new(Mutex::new(HashMap::new())),
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
        }
    }

    /// Override the transient-failure retry policy.
    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    pub fn add_provider(&mut self, provider: Arc<dyn LlmProvider>) {
        let name = provider.name().to_string();
        info!(provider = %name, "registered LLM provider");
        self.breakers
            .lock()
            .entry(name)
            .or_insert_with(CircuitBreaker::new);
        self.providers.push(provider);
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn is_available(&self, provider_name: &str) -> bool {
        self.breakers
            .lock()
            .get_mut(provider_name)
            .is_none_or(|cb| cb.allow_request())
    }

    fn record_success(&self, provider_name: &str) {
        if let Some(cb) = self.breakers.lock().get_mut(provider_name) {
            cb.record_success();
        }
    }

    fn record_failure(&self, provider_name: &str) {
        let mut breakers = self.breakers.lock();
        if let Some(cb) = breakers.get_mut(provider_name) {
            let was_open = cb.is_open();
            cb.record_failure();
            if !was_open && cb.is_open() {
                warn!(
                    provider = provider_name,
                    failures = cb.consecutive_failures,
                    "circuit breaker open, provider disabled for {}s",
                    CIRCUIT_OPEN_DURATION.as_secs()
                );
            }
        }
    }

    /// Find the backend for a model string like "anthropic/claude-sonnet-4".
    /// Returns the provider and the model name with the prefix stripped.
    pub fn resolve(&self, model: &str) -> Option<(Arc<dyn LlmProvider>, String)> {
        if let Some((prefix, model_name)) = model.split_once('/')
            && let Some(p) = self
                .providers
                .iter()
                .find(|p| p.name().eq_ignore_ascii_case(prefix))
        {
            return Some((Arc::clone(p), model_name.to_string()));
        }
        self.providers
            .iter()
            .find(|p| p.models().iter().any(|m| m == model))
            .map(|p| (Arc::clone(p), model.to_string()))
    }

    pub async fn complete(
        &self,
        request: &LlmRequest,
        fallback_model: Option<&str>,
    ) -> Result<LlmResponse> {
        self.route(request, fallback_model, |p, r| async move { p.complete(&r).await })
            .await
    }

    pub async fn stream(
        &self,
        request: &LlmRequest,
        fallback_model: Option<&str>,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamChunk>> {
        self.route(request, fallback_model, |p, r| async move { p.stream(&r).await })
            .await
    }

    /// Try the primary model, then the fallback. The last real error is
    /// returned when both fail.
    async fn route<T, F, Fut>(
        &self,
        request: &LlmRequest,
        fallback_model: Option<&str>,
        call: F,
    ) -> Result<T>
    where
        F: Fn(Arc<dyn LlmProvider>, LlmRequest) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err: Option<WrightError> = None;
        let candidates = std::iter::once(request.model.as_str()).chain(fallback_model);

        for (idx, model) in candidates.enumerate() {
            let Some((provider, model_name)) = self.resolve(model) else {
                continue;
            };
            let name = provider.name().to_string();
            if !self.is_available(&name) {
                warn!(provider = %name, "circuit breaker is open, skipping provider");
                last_err = Some(WrightError::LlmProvider(format!(
                    "provider {name} unavailable: circuit open"
                )));
                continue;
            }
            let mut req = request.clone();
            req.model = model_name;

            match self.with_retry(&name, || call(Arc::clone(&provider), req.clone())).await {
                Ok(out) => {
                    self.record_success(&name);
                    return Ok(out);
                }
                // A rate limit is the provider working as intended: surface it.
                Err(e) if e.is_rate_limited() => return Err(e),
                Err(e) => {
                    self.record_failure(&name);
                    if idx == 0 && fallback_model.is_some() {
                        warn!(provider = %name, error = %e, "primary provider failed, attempting failover");
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| WrightError::ModelNotFound(request.model.clone())))
    }

    async fn with_retry<T, F, Fut>(&self, provider: &str, attempt_fn: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match attempt_fn().await {
                Ok(out) => return Ok(out),
                Err(e) if is_retryable(&e) && attempt < self.max_retries => {
                    let delay = self.base_delay * 2u32.saturating_pow(attempt);
                    warn!(
                        provider,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
