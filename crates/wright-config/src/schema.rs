use serde::{Deserialize, Serialize};

/// Root configuration, read from `wright.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WrightConfig {
    pub agent: AgentConfig,
    pub retry: RetryConfig,
    pub review: ReviewConfig,
    pub sessions: SessionsConfig,
    pub tools: ToolsConfig,
    pub logging: LoggingConfig,
    pub services: ServicesConfig,
}

// ── Agent ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Primary model identifier, e.g. "anthropic/claude-sonnet-4-20250514".
    pub model: String,
    /// Fallback model for when the primary is unavailable.
    pub fallback_model: Option<String>,
    /// Replaces the built-in system prompt when set.
    pub system_prompt: Option<String>,
    /// Maximum tokens per response.
    pub max_tokens: u32,
    /// Temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Stream responses from the provider.
    pub stream: bool,
    /// Maximum loop iterations before a run is stopped.
    pub max_iterations: u32,
    /// Number of most recent history messages the model sees.
    pub history_window: usize,
    /// Maximum tokens per tool result kept in history. 0 disables truncation.
    pub tool_result_max_tokens: usize,
    /// Run consecutive read-only tool calls of one turn concurrently.
    pub parallel_tool_calls: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4-20250514".into(),
            fallback_model: None,
            system_prompt: None,
            max_tokens: 8192,
            temperature: 0.2,
            stream: true,
            max_iterations: 100,
            history_window: 100,
            tool_result_max_tokens: 12_000,
            parallel_tool_calls: true,
        }
    }
}

// ── Retry ──────────────────────────────────────────────────────

/// Rate-limit retry policy of the orchestration loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_rate_limit_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: 3,
            backoff_base_ms: 2_000,
            backoff_max_ms: 60_000,
        }
    }
}

// ── Review ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// When disabled, `request_review` approves without calling the model.
    pub enabled: bool,
    /// Model used for the audit call. Defaults to `agent.model`.
    pub model: Option<String>,
    /// Maximum number of changed files read for context.
    pub max_files: usize,
    /// Bytes read per file.
    pub max_file_bytes: usize,
    pub max_tokens: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
            max_files: 8,
            max_file_bytes: 16_384,
            max_tokens: 2048,
        }
    }
}

// ── Sessions ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Sessions idle longer than this are evicted. 0 disables TTL eviction.
    pub idle_ttl_secs: u64,
    /// Upper bound on retained sessions. 0 means unbounded.
    pub max_sessions: usize,
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 3600,
            max_sessions: 256,
            sweep_interval_secs: 300,
        }
    }
}

// ── Tools ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Extra regexes screened against destructive tool arguments.
    pub denied_patterns: Vec<String>,
    pub command_timeout_secs: u64,
    /// Register the `run_command` tool.
    pub allow_commands: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            denied_patterns: vec![],
            command_timeout_secs: 120,
            allow_commands: true,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Services ───────────────────────────────────────────────────

/// Provider credentials. Keys are never printed by `wright config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// Base URL for OpenAI-compatible endpoints.
    pub openai_base_url: Option<String>,
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Warning,
    Error,
}

/// A single problem found by [`WrightConfig::validate`].
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            WarningSeverity::Warning => "warning",
            WarningSeverity::Error => "error",
        };
        write!(f, "[{}] {}: {}", tag, self.field, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " ({})", hint)?;
        }
        Ok(())
    }
}

impl WrightConfig {
    /// Model used by the review subroutine.
    pub fn review_model(&self) -> &str {
        self.review.model.as_deref().unwrap_or(&self.agent.model)
    }

    /// Check the config for problems. Returns the non-fatal warnings, or an
    /// error listing every fatal one.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Agent model ───
        let model = &self.agent.model;
        if model.is_empty() {
            warnings.push(ConfigWarning {
                field: "agent.model".into(),
                message: "model is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'anthropic/claude-sonnet-4-20250514' or 'openai/gpt-4o'".into()),
            });
        } else if !model.contains('/') {
            warnings.push(ConfigWarning {
                field: "agent.model".into(),
                message: format!("model '{}' should be in 'provider/model' format", model),
                severity: WarningSeverity::Warning,
                hint: Some("Use 'anthropic/claude-sonnet-4-20250514' or 'openai/gpt-4o'".into()),
            });
        }

        // ── Iterations ───
        if self.agent.max_iterations == 0 {
            warnings.push(ConfigWarning {
                field: "agent.max_iterations".into(),
                message: "max_iterations is 0, no run could make progress".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 100".into()),
            });
        }

        if self.agent.history_window < 2 {
            warnings.push(ConfigWarning {
                field: "agent.history_window".into(),
                message: format!(
                    "history_window {} hides tool results from the model",
                    self.agent.history_window
                ),
                severity: WarningSeverity::Warning,
                hint: Some("Use a window between 50 and 200".into()),
            });
        }

        // ── Temperature ───
        if self.agent.temperature < 0.0 || self.agent.temperature > 2.0 {
            warnings.push(ConfigWarning {
                field: "agent.temperature".into(),
                message: format!("temperature {} is out of range", self.agent.temperature),
                severity: WarningSeverity::Error,
                hint: Some("Temperature must be between 0.0 and 2.0".into()),
            });
        }

        if self.agent.max_tokens == 0 {
            warnings.push(ConfigWarning {
                field: "agent.max_tokens".into(),
                message: "max_tokens is 0, the model cannot produce output".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 8192".into()),
            });
        }

        // ── Retry ───
        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            warnings.push(ConfigWarning {
                field: "retry.backoff_base_ms".into(),
                message: "base delay exceeds backoff_max_ms, every retry waits the maximum".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }

        // ── Tools ───
        for (i, pattern) in self.tools.denied_patterns.iter().enumerate() {
            if let Err(e) = regex::Regex::new(pattern) {
                warnings.push(ConfigWarning {
                    field: format!("tools.denied_patterns[{}]", i),
                    message: format!("invalid regex '{}': {}", pattern, e),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
        }

        if self.tools.command_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "tools.command_timeout_secs".into(),
                message: "command timeout is 0, every command will time out".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 120".into()),
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
