//! A3S Orchestrator Core - Foundational Types
//!
//! Error classification, configuration and the hook configuration model
//! shared by the orchestrator runtime and its CLI.

pub mod config;
pub mod error;
pub mod hooks;

// Re-export commonly used types
pub use config::{AgentConfig, LogLevel, OrchestratorConfig, TaskConfig, TaskLimits};
pub use error::{
    classify, Classification, ErrorCategory, ErrorCode, OrchestratorError, Result,
    SerializedError, Severity,
};
pub use hooks::{HookDefinition, HookEventType, HookKind, HookMatcher, HooksConfig};

/// A3S Orchestrator version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
