//! Error classification
//!
//! Every failure surfaced to the agent carries a numeric code. The code space
//! is partitioned into contiguous per-category ranges, and each code maps to a
//! fixed default severity / recoverable / retryable triple:
//!
//! ```text
//!  1000-1999   tool            MEDIUM   recoverable
//!  2000-2999   permission      MEDIUM   recoverable
//!  3000-3999   configuration   MEDIUM   recoverable
//!  4000-4999   network         MEDIUM   recoverable  retryable
//!  5000-5999   auth            HIGH     recoverable
//!  6000-6999   validation      LOW      recoverable
//!  7000-7999   session         MEDIUM   recoverable
//!  8000-8999   sandbox         HIGH
//!  9000-9999   system          HIGH     recoverable
//! 10000-10999  plugin          MEDIUM   recoverable
//!  otherwise   unknown         HIGH
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::BTreeMap;
use std::io;
use thiserror::Error;

// ============================================================================
// Codes and categories
// ============================================================================

/// Numeric error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    // Tool (1000-1999)
    pub const TOOL_NOT_FOUND: ErrorCode = ErrorCode(1001);
    pub const TOOL_EXECUTION_FAILED: ErrorCode = ErrorCode(1002);
    pub const TOOL_TIMEOUT: ErrorCode = ErrorCode(1003);
    pub const TOOL_ALREADY_REGISTERED: ErrorCode = ErrorCode(1004);
    pub const TOOL_PANICKED: ErrorCode = ErrorCode(1005);
    pub const STRING_NOT_FOUND: ErrorCode = ErrorCode(1101);
    pub const NON_UNIQUE_MATCH: ErrorCode = ErrorCode(1102);
    pub const RESOURCE_LIMIT_EXCEEDED: ErrorCode = ErrorCode(1201);
    pub const TASK_NOT_FOUND: ErrorCode = ErrorCode(1202);

    // Permission (2000-2999)
    pub const PERMISSION_DENIED: ErrorCode = ErrorCode(2001);
    pub const HOOK_BLOCKED: ErrorCode = ErrorCode(2002);
    pub const PATH_OUTSIDE_WORKSPACE: ErrorCode = ErrorCode(2003);

    // Configuration (3000-3999)
    pub const CONFIG_INVALID: ErrorCode = ErrorCode(3001);
    pub const CONFIG_NOT_FOUND: ErrorCode = ErrorCode(3002);
    pub const CONFIG_PARSE_FAILED: ErrorCode = ErrorCode(3003);

    // Network (4000-4999)
    pub const NETWORK_CONNECTION_FAILED: ErrorCode = ErrorCode(4001);
    pub const NETWORK_TIMEOUT: ErrorCode = ErrorCode(4002);
    pub const NETWORK_RATE_LIMITED: ErrorCode = ErrorCode(4003);
    pub const NETWORK_BAD_RESPONSE: ErrorCode = ErrorCode(4004);

    // Auth (5000-5999)
    pub const AUTH_FAILED: ErrorCode = ErrorCode(5001);
    pub const AUTH_TOKEN_EXPIRED: ErrorCode = ErrorCode(5002);

    // Validation (6000-6999)
    pub const VALIDATION_FAILED: ErrorCode = ErrorCode(6001);

    // Session (7000-7999)
    pub const SESSION_NOT_FOUND: ErrorCode = ErrorCode(7001);
    pub const SESSION_EXPIRED: ErrorCode = ErrorCode(7002);

    // Sandbox (8000-8999)
    pub const SANDBOX_VIOLATION: ErrorCode = ErrorCode(8001);
    pub const SANDBOX_ESCAPE: ErrorCode = ErrorCode(8002);
    pub const SANDBOX_UNAVAILABLE: ErrorCode = ErrorCode(8003);

    // System (9000-9999)
    pub const SYSTEM_FILE_NOT_FOUND: ErrorCode = ErrorCode(9001);
    pub const SYSTEM_PERMISSION_DENIED: ErrorCode = ErrorCode(9002);
    pub const SYSTEM_IO_ERROR: ErrorCode = ErrorCode(9003);
    pub const SYSTEM_OUT_OF_MEMORY: ErrorCode = ErrorCode(9004);
    pub const SYSTEM_INTERNAL: ErrorCode = ErrorCode(9005);

    // Plugin (10000-10999)
    pub const PLUGIN_NOT_FOUND: ErrorCode = ErrorCode(10001);
    pub const PLUGIN_LOAD_FAILED: ErrorCode = ErrorCode(10002);

    pub const UNKNOWN: ErrorCode = ErrorCode(99999);

    /// Raw numeric value
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Category this code falls into
    pub fn category(self) -> ErrorCategory {
        ErrorCategory::from_code(self)
    }

    /// Symbolic name of the code (the serialized `kind`)
    ///
    /// Codes without a registered name fall back to the category's generic kind.
    pub fn kind(self) -> &'static str {
        NAMED_CODES
            .iter()
            .find(|(code, _)| *code == self)
            .map(|(_, name)| *name)
            .unwrap_or_else(|| self.category().generic_kind())
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const NAMED_CODES: &[(ErrorCode, &str)] = &[
    (ErrorCode::TOOL_NOT_FOUND, "TOOL_NOT_FOUND"),
    (ErrorCode::TOOL_EXECUTION_FAILED, "TOOL_EXECUTION_FAILED"),
    (ErrorCode::TOOL_TIMEOUT, "TOOL_TIMEOUT"),
    (ErrorCode::TOOL_ALREADY_REGISTERED, "TOOL_ALREADY_REGISTERED"),
    (ErrorCode::TOOL_PANICKED, "TOOL_PANICKED"),
    (ErrorCode::STRING_NOT_FOUND, "STRING_NOT_FOUND"),
    (ErrorCode::NON_UNIQUE_MATCH, "NON_UNIQUE_MATCH"),
    (ErrorCode::RESOURCE_LIMIT_EXCEEDED, "RESOURCE_LIMIT_EXCEEDED"),
    (ErrorCode::TASK_NOT_FOUND, "TASK_NOT_FOUND"),
    (ErrorCode::PERMISSION_DENIED, "PERMISSION_DENIED"),
    (ErrorCode::HOOK_BLOCKED, "HOOK_BLOCKED"),
    (ErrorCode::PATH_OUTSIDE_WORKSPACE, "PATH_OUTSIDE_WORKSPACE"),
    (ErrorCode::CONFIG_INVALID, "CONFIG_INVALID"),
    (ErrorCode::CONFIG_NOT_FOUND, "CONFIG_NOT_FOUND"),
    (ErrorCode::CONFIG_PARSE_FAILED, "CONFIG_PARSE_FAILED"),
    (ErrorCode::NETWORK_CONNECTION_FAILED, "NETWORK_CONNECTION_FAILED"),
    (ErrorCode::NETWORK_TIMEOUT, "NETWORK_TIMEOUT"),
    (ErrorCode::NETWORK_RATE_LIMITED, "NETWORK_RATE_LIMITED"),
    (ErrorCode::NETWORK_BAD_RESPONSE, "NETWORK_BAD_RESPONSE"),
    (ErrorCode::AUTH_FAILED, "AUTH_FAILED"),
    (ErrorCode::AUTH_TOKEN_EXPIRED, "AUTH_TOKEN_EXPIRED"),
    (ErrorCode::VALIDATION_FAILED, "VALIDATION_FAILED"),
    (ErrorCode::SESSION_NOT_FOUND, "SESSION_NOT_FOUND"),
    (ErrorCode::SESSION_EXPIRED, "SESSION_EXPIRED"),
    (ErrorCode::SANDBOX_VIOLATION, "SANDBOX_VIOLATION"),
    (ErrorCode::SANDBOX_ESCAPE, "SANDBOX_ESCAPE"),
    (ErrorCode::SANDBOX_UNAVAILABLE, "SANDBOX_UNAVAILABLE"),
    (ErrorCode::SYSTEM_FILE_NOT_FOUND, "SYSTEM_FILE_NOT_FOUND"),
    (ErrorCode::SYSTEM_PERMISSION_DENIED, "SYSTEM_PERMISSION_DENIED"),
    (ErrorCode::SYSTEM_IO_ERROR, "SYSTEM_IO_ERROR"),
    (ErrorCode::SYSTEM_OUT_OF_MEMORY, "SYSTEM_OUT_OF_MEMORY"),
    (ErrorCode::SYSTEM_INTERNAL, "SYSTEM_INTERNAL"),
    (ErrorCode::PLUGIN_NOT_FOUND, "PLUGIN_NOT_FOUND"),
    (ErrorCode::PLUGIN_LOAD_FAILED, "PLUGIN_LOAD_FAILED"),
    (ErrorCode::UNKNOWN, "UNKNOWN"),
];

/// Error category, derived from the code range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Tool,
    Permission,
    Configuration,
    Network,
    Auth,
    Validation,
    Session,
    Sandbox,
    System,
    Plugin,
    Unknown,
}

impl ErrorCategory {
    /// Categories that own a contiguous code range, in range order
    const RANGED: [(ErrorCategory, u32, u32); 10] = [
        (ErrorCategory::Tool, 1000, 1999),
        (ErrorCategory::Permission, 2000, 2999),
        (ErrorCategory::Configuration, 3000, 3999),
        (ErrorCategory::Network, 4000, 4999),
        (ErrorCategory::Auth, 5000, 5999),
        (ErrorCategory::Validation, 6000, 6999),
        (ErrorCategory::Session, 7000, 7999),
        (ErrorCategory::Sandbox, 8000, 8999),
        (ErrorCategory::System, 9000, 9999),
        (ErrorCategory::Plugin, 10000, 10999),
    ];

    pub fn from_code(code: ErrorCode) -> Self {
        Self::RANGED
            .iter()
            .find(|(_, lo, hi)| (*lo..=*hi).contains(&code.0))
            .map(|(category, _, _)| *category)
            .unwrap_or(ErrorCategory::Unknown)
    }

    /// Inclusive code range, `None` for the unknown category
    pub fn range(self) -> Option<(u32, u32)> {
        Self::RANGED
            .iter()
            .find(|(category, _, _)| *category == self)
            .map(|(_, lo, hi)| (*lo, *hi))
    }

    fn generic_kind(self) -> &'static str {
        match self {
            ErrorCategory::Tool => "TOOL_ERROR",
            ErrorCategory::Permission => "PERMISSION_ERROR",
            ErrorCategory::Configuration => "CONFIGURATION_ERROR",
            ErrorCategory::Network => "NETWORK_ERROR",
            ErrorCategory::Auth => "AUTH_ERROR",
            ErrorCategory::Validation => "VALIDATION_ERROR",
            ErrorCategory::Session => "SESSION_ERROR",
            ErrorCategory::Sandbox => "SANDBOX_ERROR",
            ErrorCategory::System => "SYSTEM_ERROR",
            ErrorCategory::Plugin => "PLUGIN_ERROR",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Tool => "tool",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Network => "network",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Session => "session",
            ErrorCategory::Sandbox => "sandbox",
            ErrorCategory::System => "system",
            ErrorCategory::Plugin => "plugin",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Error severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Default severity / recoverable / retryable triple for a code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub severity: Severity,
    pub recoverable: bool,
    pub retryable: bool,
}

impl Classification {
    const fn new(severity: Severity, recoverable: bool, retryable: bool) -> Self {
        Self {
            severity,
            recoverable,
            retryable,
        }
    }
}

/// Look up the default classification for a code.
///
/// Pure: the same code always yields the same triple.
pub fn classify(code: ErrorCode) -> Classification {
    use Severity::*;

    match code {
        ErrorCode::SANDBOX_ESCAPE | ErrorCode::SYSTEM_OUT_OF_MEMORY => {
            Classification::new(Critical, false, false)
        }
        ErrorCode::TOOL_TIMEOUT | ErrorCode::RESOURCE_LIMIT_EXCEEDED => {
            Classification::new(Medium, true, true)
        }
        ErrorCode::NETWORK_RATE_LIMITED => Classification::new(Low, true, true),
        ErrorCode::TOOL_PANICKED => Classification::new(High, true, false),
        _ => match code.category() {
            ErrorCategory::Tool => Classification::new(Medium, true, false),
            ErrorCategory::Permission => Classification::new(Medium, true, false),
            ErrorCategory::Configuration => Classification::new(Medium, true, false),
            ErrorCategory::Network => Classification::new(Medium, true, true),
            ErrorCategory::Auth => Classification::new(High, true, false),
            ErrorCategory::Validation => Classification::new(Low, true, false),
            ErrorCategory::Session => Classification::new(Medium, true, false),
            ErrorCategory::Sandbox => Classification::new(High, false, false),
            ErrorCategory::System => Classification::new(High, true, false),
            ErrorCategory::Plugin => Classification::new(Medium, true, false),
            ErrorCategory::Unknown => Classification::new(High, false, false),
        },
    }
}

// ============================================================================
// OrchestratorError
// ============================================================================

/// Classified error
///
/// Built from a code, whose default classification can be overridden at
/// construction with the `with_*` builders.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct OrchestratorError {
    code: ErrorCode,
    message: String,
    severity: Severity,
    recoverable: bool,
    retryable: bool,
    details: BTreeMap<String, serde_json::Value>,
    context: BTreeMap<String, serde_json::Value>,
    #[source]
    cause: Option<Box<OrchestratorError>>,
    timestamp: DateTime<Utc>,
    stack: Option<String>,
}

impl OrchestratorError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let Classification {
            severity,
            recoverable,
            retryable,
        } = classify(code);

        let backtrace = Backtrace::capture();
        let stack = match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };

        Self {
            code,
            message: message.into(),
            severity,
            recoverable,
            retryable,
            details: BTreeMap::new(),
            context: BTreeMap::new(),
            cause: None,
            timestamp: Utc::now(),
            stack,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attach a detail entry describing the failure itself
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Attach a context entry describing where the failure happened (tool, path, task)
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: OrchestratorError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn kind(&self) -> &'static str {
        self.code.kind()
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    pub fn details(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.details
    }

    pub fn context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.context
    }

    pub fn cause(&self) -> Option<&OrchestratorError> {
        self.cause.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Iterate this error followed by its causes, outermost first
    pub fn chain(&self) -> impl Iterator<Item = &OrchestratorError> {
        std::iter::successors(Some(self), |e| e.cause())
    }

    /// Innermost cause (self when there is none)
    pub fn root_cause(&self) -> &OrchestratorError {
        self.chain().last().unwrap_or(self)
    }

    // ------------------------------------------------------------------------
    // Type guards
    // ------------------------------------------------------------------------

    pub fn is_category(&self, category: ErrorCategory) -> bool {
        self.category() == category
    }

    pub fn is_tool_error(&self) -> bool {
        self.is_category(ErrorCategory::Tool)
    }

    pub fn is_permission_error(&self) -> bool {
        self.is_category(ErrorCategory::Permission)
    }

    pub fn is_configuration_error(&self) -> bool {
        self.is_category(ErrorCategory::Configuration)
    }

    pub fn is_network_error(&self) -> bool {
        self.is_category(ErrorCategory::Network)
    }

    pub fn is_auth_error(&self) -> bool {
        self.is_category(ErrorCategory::Auth)
    }

    pub fn is_validation_error(&self) -> bool {
        self.is_category(ErrorCategory::Validation)
    }

    pub fn is_session_error(&self) -> bool {
        self.is_category(ErrorCategory::Session)
    }

    pub fn is_sandbox_error(&self) -> bool {
        self.is_category(ErrorCategory::Sandbox)
    }

    pub fn is_system_error(&self) -> bool {
        self.is_category(ErrorCategory::System)
    }

    pub fn is_plugin_error(&self) -> bool {
        self.is_category(ErrorCategory::Plugin)
    }

    // ------------------------------------------------------------------------
    // Wrapping platform failures
    // ------------------------------------------------------------------------

    /// Classify an I/O error by its kind
    pub fn from_io(err: &io::Error) -> Self {
        let code = match err.kind() {
            io::ErrorKind::NotFound => ErrorCode::SYSTEM_FILE_NOT_FOUND,
            io::ErrorKind::PermissionDenied => ErrorCode::SYSTEM_PERMISSION_DENIED,
            io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => ErrorCode::NETWORK_CONNECTION_FAILED,
            io::ErrorKind::OutOfMemory => ErrorCode::SYSTEM_OUT_OF_MEMORY,
            _ => ErrorCode::SYSTEM_IO_ERROR,
        };
        Self::new(code, err.to_string()).with_detail("io_kind", format!("{:?}", err.kind()))
    }

    /// Recover a classified error from an `anyhow` chain.
    ///
    /// An `OrchestratorError` anywhere in the chain wins; otherwise the first
    /// I/O or JSON error decides the code; otherwise `fallback` is used. The
    /// message keeps the full context chain.
    pub fn from_anyhow(err: &anyhow::Error, fallback: ErrorCode) -> Self {
        if let Some(classified) = err.downcast_ref::<OrchestratorError>() {
            return classified.clone();
        }

        let message = format!("{:#}", err);
        for cause in err.chain() {
            if let Some(classified) = cause.downcast_ref::<OrchestratorError>() {
                let mut wrapped = Self::new(classified.code, message);
                wrapped.severity = classified.severity;
                wrapped.recoverable = classified.recoverable;
                wrapped.retryable = classified.retryable;
                wrapped.details = classified.details.clone();
                wrapped.context = classified.context.clone();
                return wrapped.with_cause(classified.clone());
            }
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                let inner = Self::from_io(io_err);
                let mut wrapped = Self::new(inner.code, message);
                wrapped.details = inner.details.clone();
                return wrapped.with_cause(inner);
            }
            if let Some(json_err) = cause.downcast_ref::<serde_json::Error>() {
                return Self::new(ErrorCode::VALIDATION_FAILED, message)
                    .with_cause(Self::from(json_err.to_string()));
            }
        }

        Self::new(fallback, message)
    }

    // ------------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------------

    /// Serializable form; `verbose` adds the cause chain and stack trace
    pub fn to_serialized(&self, verbose: bool) -> SerializedError {
        SerializedError {
            code: self.code.0,
            kind: self.kind().to_string(),
            message: self.message.clone(),
            severity: self.severity,
            recoverable: self.recoverable,
            retryable: self.retryable,
            timestamp: self.timestamp,
            details: self.details.clone(),
            context: self.context.clone(),
            cause: if verbose {
                self.cause
                    .as_ref()
                    .map(|c| Box::new(c.to_serialized(true)))
            } else {
                None
            },
            stack: if verbose { self.stack.clone() } else { None },
        }
    }

    pub fn to_json(&self, verbose: bool) -> serde_json::Value {
        serde_json::to_value(self.to_serialized(verbose)).unwrap_or_else(|_| {
            serde_json::json!({
                "code": self.code.0,
                "kind": self.kind(),
                "message": self.message,
            })
        })
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(err: io::Error) -> Self {
        Self::from_io(&err)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::VALIDATION_FAILED, err.to_string())
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::new(ErrorCode::CONFIG_PARSE_FAILED, err.to_string())
    }
}

impl From<String> for OrchestratorError {
    fn from(message: String) -> Self {
        Self::new(ErrorCode::UNKNOWN, message)
    }
}

/// Wire form of a classified error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedError {
    pub code: u32,
    pub kind: String,
    pub message: String,
    pub severity: Severity,
    pub recoverable: bool,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<SerializedError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl SerializedError {
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode(self.code)
    }
}

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;
