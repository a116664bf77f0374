//! # wright-cli
//!
//! Command-line interface for the Wright build agent.
//!
//! ## Commands
//!
//! - `wright run` to run one message against a project
//! - `wright chat` for an interactive session
//! - `wright tools` to list the tools the model can call
//! - `wright config` to show the effective configuration
//! - `wright completions` for shell completions

pub mod commands;

pub use commands::Cli;
