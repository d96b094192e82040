//! A3S Orchestrator Library
//!
//! Tool-execution and orchestration core of an agentic coding assistant.
//! The agent loop asks for tools by name; this crate runs them under policy.
//!
//! ## Architecture
//!
//! ```text
//! Agent loop --ToolInvocation--> Orchestrator
//!                                    |
//!                                    +-- ToolRegistry
//!                                    |      +-- schema + typed input validation
//!                                    |      +-- timeout, panic isolation
//!                                    |      +-- result normalization
//!                                    |
//!                                    +-- HookEngine (PreToolUse / PostToolUse / ...)
//!                                    |      +-- command hooks (sh -c, JSON on stdin)
//!                                    |      +-- URL hooks (JSON body)
//!                                    |
//!                                    +-- Tools
//!                                    |      +-- bash
//!                                    |      +-- edit / multi_edit ──> EditEngine
//!                                    |      +-- task / task_output / task_kill
//!                                    |
//!                                    +-- BackgroundTaskManager
//!                                           +-- shell tasks
//!                                           +-- agent tasks (AgentRunner)
//! ```
//!
//! ## Hooks
//!
//! Hooks intercept lifecycle events:
//! - `PreToolUse`: Before tool execution (can block)
//! - `PostToolUse`: After a successful tool call
//! - `PostToolUseFailure`: After a failed tool call
//! - `UserPromptSubmit`: Before a prompt is processed (can block)
//! - `SessionStart` / `SessionEnd`: Session boundaries
//!
//! A blocking hook that times out or fails does not block the call.
//!
//! ## Errors
//!
//! Every failure leaving the registry is an [`OrchestratorError`] serialized
//! with its numeric code, category and retry flags.
//!
//! [`OrchestratorError`]: a3s_orchestrator_core::OrchestratorError

pub mod cli;
pub mod edit;
pub mod hooks;
pub mod orchestrator;
pub mod tasks;
pub mod tools;

pub use orchestrator::Orchestrator;
pub use tools::{ToolDefinition, ToolInvocation, ToolRegistry, ToolResult};
