//! # wright-runtime
//!
//! The orchestration core: the tool-calling loop, task tracking, self-review
//! and the session registry.
//!
//! ## Architecture
//!
//! ```text
//!  caller ─▶ AgentRuntime ─▶ ConversationSession ─▶ OrchestrationEngine
//!                                                          │
//!             ┌─────────────────┬──────────────────┬───────┴────────┐
//!             ▼                 ▼                  ▼                ▼
//!      ProviderAdapter     ToolRegistry      control tools      EventLog
//!       (wright-llm)      (wright-tools)    tasks, review    (per session)
//! ```

pub mod context;
pub mod control;
pub mod engine;
pub mod fallback;
pub mod review;
pub mod runtime;
pub mod session;
pub mod tasks;

pub use control::{CONTROL_TOOLS, ControlCall, control_specs, is_control_tool};
pub use engine::{EngineConfig, OrchestrationEngine, RunOutcome};
pub use fallback::TerminalPayload;
pub use review::{ReviewSettings, ReviewSubroutine, Verdict};
pub use runtime::{AgentRuntime, RunRequest};
pub use session::{ConversationSession, EvictionPolicy, SessionCheckout, SessionSnapshot, SessionStatus, SessionStore};
pub use tasks::{Task, TaskStatus, TaskTracker};
