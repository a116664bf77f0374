//! # wright-config
//!
//! Configuration for the Wright build agent. Reads `wright.toml`, then applies
//! environment overrides, then validates.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::WrightConfig;
pub use schema::{
    AgentConfig, ConfigWarning, LoggingConfig, RetryConfig, ReviewConfig, ServicesConfig,
    SessionsConfig, ToolsConfig, WarningSeverity,
};
