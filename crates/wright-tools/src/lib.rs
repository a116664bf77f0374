//! # wright-tools
//!
//! The tool registry the orchestration loop dispatches to, the guard that
//! screens destructive calls, and a small set of built-in project tools.

pub mod builtin;
pub mod guard;
pub mod project;
pub mod registry;

pub use builtin::{BuiltinOptions, register_builtins};
pub use guard::{CommandGuard, GuardVerdict};
pub use project::{FileContent, FileEntry, ProjectFs};
pub use registry::{ToolExecutor, ToolRegistry};
