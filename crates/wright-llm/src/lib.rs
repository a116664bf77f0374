//! # wright-llm
//!
//! Model access for the Wright build agent. Backends implement
//! [`LlmProvider`]; the [`ModelRouter`] adds failover and circuit breaking;
//! the [`ProviderAdapter`] turns streamed or blocking exchanges into one
//! [`Generation`] per turn.

pub mod adapter;
pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod router;
mod sse;

pub use adapter::{AdapterSettings, Delta, Generation, ProviderAdapter};
pub use anthropic::AnthropicProvider;
pub use mock::{MockProvider, MockResponse};
pub use openai::OpenAiProvider;
pub use provider::{
    LlmProvider, LlmRequest, LlmResponse, StopReason, StreamChunk, Usage, classify_error,
    parse_tool_arguments,
};
pub use router::ModelRouter;
