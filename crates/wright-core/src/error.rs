use thiserror::Error;

/// Unified error type for the Wright build agent.
#[derive(Error, Debug)]
pub enum WrightError {
    // ── LLM errors ─────────────────────────────────────────────
    #[error("llm provider error: {0}")]
    LlmProvider(String),

    #[error("llm rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("model not found: {0}")]
    ModelNotFound(String),

    // ── Tool errors ────────────────────────────────────────────
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {tool}: {reason}")]
    ToolExecution { tool: String, reason: String },

    #[error("tool denied by guard: {tool}: {reason}")]
    ToolDenied { tool: String, reason: String },

    #[error("tool registered twice: {0}")]
    DuplicateTool(String),

    #[error("tool name is reserved for the engine: {0}")]
    ReservedToolName(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Session errors ─────────────────────────────────────────
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {session} belongs to project {project}")]
    ProjectMismatch { session: String, project: String },

    #[error("operation cancelled")]
    Cancelled,

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl WrightError {
    /// Whether this error is a provider-side rate limit. The engine retries
    /// these with backoff; every other provider failure is fatal.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, WrightError::RateLimited { .. })
    }

    /// Provider-supplied retry hint, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            WrightError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, WrightError>;
