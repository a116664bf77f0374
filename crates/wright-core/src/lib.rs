//! # wright-core
//!
//! Core types, traits, and primitives for the Wright build agent.
//! This crate defines the shared vocabulary used by every other crate in the workspace.

pub mod error;
pub mod event;
pub mod message;
pub mod tool;
pub mod types;

pub use error::{Result, WrightError};
pub use event::{AgentEvent, EventKind, EventLog};
pub use message::{Message, MessageContent, Role};
pub use tool::{ToolCall, ToolContext, ToolResult, ToolSpec};
pub use types::*;
