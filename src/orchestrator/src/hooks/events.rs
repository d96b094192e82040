//! Hook payloads and outcomes
//!
//! The payload is what a hook receives (command stdin or URL request body);
//! [`HookResponse`] is what it may answer with.

use a3s_orchestrator_core::HookEventType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Data sent to every hook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookPayload {
    pub event: HookEventType,
    pub tool_name: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl HookPayload {
    pub fn new(event: HookEventType, session_id: impl Into<String>) -> Self {
        Self {
            event,
            tool_name: None,
            tool_input: None,
            tool_output: None,
            message: None,
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, input: serde_json::Value) -> Self {
        self.tool_name = Some(name.into());
        self.tool_input = Some(input);
        self
    }

    pub fn with_tool_output(mut self, output: serde_json::Value) -> Self {
        self.tool_output = Some(output);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// What a hook may answer with
///
/// `blocked: true` blocks whatever the exit code; `blocked: false` only
/// stands when the hook also exits 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookResponse {
    #[serde(default)]
    pub blocked: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of running one hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HookOutcome {
    /// The hook let the action through
    Allowed {
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    /// The hook explicitly blocked the action
    Blocked { message: String },
    /// The hook could not be run or gave an unusable answer (treated as allow)
    Failed { reason: String },
    /// The hook did not answer in time (treated as allow)
    TimedOut,
}

impl HookOutcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, HookOutcome::Blocked { .. })
    }
}

/// One blocking hook that ran during a dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookRun {
    pub hook: String,
    #[serde(flatten)]
    pub outcome: HookOutcome,
    pub duration_ms: u64,
}

/// Aggregate of an event dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDispatchResult {
    /// Every blocking hook that ran produced a usable answer
    pub success: bool,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_message: Option<String>,
    /// Blocking hooks that ran, in order
    pub output: Vec<HookRun>,
}

impl Default for HookDispatchResult {
    fn default() -> Self {
        Self {
            success: true,
            blocked: false,
            block_message: None,
            output: Vec::new(),
        }
    }
}

/// Answer of the PreToolUse pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreToolUseDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&HookDispatchResult> for PreToolUseDecision {
    fn from(result: &HookDispatchResult) -> Self {
        Self {
            allowed: !result.blocked,
            message: result.block_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_format() {
        let payload = HookPayload::new(HookEventType::PreToolUse, "s-1")
            .with_tool("bash", serde_json::json!({"command": "ls"}));
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["event"], "PreToolUse");
        assert_eq!(value["tool_name"], "bash");
        assert_eq!(value["tool_input"]["command"], "ls");
        assert_eq!(value["session_id"], "s-1");
        assert!(value.get("tool_output").is_none());
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_session_payload_has_null_tool() {
        let value =
            serde_json::to_value(HookPayload::new(HookEventType::SessionStart, "s-1")).unwrap();
        assert!(value["tool_name"].is_null());
    }

    #[test]
    fn test_response_is_lenient() {
        let response: HookResponse =
            serde_json::from_str(r#"{"blocked": true, "message": "no", "extra": 1}"#).unwrap();
        assert_eq!(response.blocked, Some(true));
        assert_eq!(response.message.as_deref(), Some("no"));

        let empty: HookResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.blocked.is_none());
    }

    #[test]
    fn test_decision_from_dispatch() {
        let mut result = HookDispatchResult::default();
        assert!(PreToolUseDecision::from(&result).allowed);

        result.blocked = true;
        result.block_message = Some("denied".to_string());
        let decision = PreToolUseDecision::from(&result);
        assert!(!decision.allowed);
        assert_eq!(decision.message.as_deref(), Some("denied"));
    }
}
