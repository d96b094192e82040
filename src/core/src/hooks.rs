//! Hook configuration model
//!
//! Hooks are configured either in the canonical per-event form:
//!
//! ```yaml
//! hooks:
//!   PreToolUse:
//!     - matcher: "bash"
//!       hooks:
//!         - type: command
//!           command: ./scripts/check-bash.sh
//!           timeout_ms: 5000
//! ```
//!
//! or in the legacy flat form, a single array where every entry names its event:
//!
//! ```yaml
//! hooks:
//!   - event: PreToolUse
//!     type: command
//!     matcher: bash
//!     command: ./scripts/check-bash.sh
//! ```
//!
//! Both are normalized at load time into [`HooksConfig`], the only form the
//! runtime sees.

use crate::error::{ErrorCode, OrchestratorError, Result};
use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default timeout for command hooks
pub const DEFAULT_COMMAND_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for URL hooks
pub const DEFAULT_URL_HOOK_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Events
// ============================================================================

/// Lifecycle event a hook can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HookEventType {
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    UserPromptSubmit,
    SessionStart,
    SessionEnd,
    Stop,
    SubagentStart,
    SubagentStop,
    Notification,
    PreCompact,
}

impl HookEventType {
    pub const ALL: [HookEventType; 11] = [
        HookEventType::PreToolUse,
        HookEventType::PostToolUse,
        HookEventType::PostToolUseFailure,
        HookEventType::UserPromptSubmit,
        HookEventType::SessionStart,
        HookEventType::SessionEnd,
        HookEventType::Stop,
        HookEventType::SubagentStart,
        HookEventType::SubagentStop,
        HookEventType::Notification,
        HookEventType::PreCompact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEventType::PreToolUse => "PreToolUse",
            HookEventType::PostToolUse => "PostToolUse",
            HookEventType::PostToolUseFailure => "PostToolUseFailure",
            HookEventType::UserPromptSubmit => "UserPromptSubmit",
            HookEventType::SessionStart => "SessionStart",
            HookEventType::SessionEnd => "SessionEnd",
            HookEventType::Stop => "Stop",
            HookEventType::SubagentStart => "SubagentStart",
            HookEventType::SubagentStop => "SubagentStop",
            HookEventType::Notification => "Notification",
            HookEventType::PreCompact => "PreCompact",
        }
    }

    /// Whether hooks for this event block by default when the flag is omitted
    pub fn default_blocking(&self) -> bool {
        matches!(
            self,
            HookEventType::PreToolUse | HookEventType::UserPromptSubmit
        )
    }
}

impl std::fmt::Display for HookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HookEventType {
    type Err = OrchestratorError;

    /// Accepts `PreToolUse` as well as `pre_tool_use`
    fn from_str(s: &str) -> Result<Self> {
        let folded: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        Self::ALL
            .iter()
            .find(|event| event.as_str().to_lowercase() == folded)
            .copied()
            .ok_or_else(|| {
                OrchestratorError::new(
                    ErrorCode::CONFIG_INVALID,
                    format!("Unknown hook event: {}", s),
                )
            })
    }
}

// ============================================================================
// Matchers
// ============================================================================

/// Tool-name matcher
#[derive(Debug, Clone)]
pub enum HookMatcher {
    /// No matcher, empty string or `*`
    All,
    /// Exact tool name
    Exact(String),
    /// `/regex/`, compiled once at load time
    Pattern(Regex),
}

impl HookMatcher {
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let raw = match raw.map(str::trim) {
            None | Some("") | Some("*") => return Ok(HookMatcher::All),
            Some(raw) => raw,
        };

        if raw.len() >= 2 && raw.starts_with('/') && raw.ends_with('/') {
            let pattern = &raw[1..raw.len() - 1];
            let regex = Regex::new(pattern).map_err(|e| {
                OrchestratorError::new(
                    ErrorCode::CONFIG_INVALID,
                    format!("Invalid hook matcher {}: {}", raw, e),
                )
            })?;
            return Ok(HookMatcher::Pattern(regex));
        }

        Ok(HookMatcher::Exact(raw.to_string()))
    }

    /// Whether the matcher admits a tool name.
    ///
    /// Events that carry no tool name are only matched by [`HookMatcher::All`].
    pub fn matches(&self, tool_name: Option<&str>) -> bool {
        match (self, tool_name) {
            (HookMatcher::All, _) => true,
            (_, None) => false,
            (HookMatcher::Exact(name), Some(tool)) => name == tool,
            (HookMatcher::Pattern(regex), Some(tool)) => regex.is_match(tool),
        }
    }
}

impl std::fmt::Display for HookMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookMatcher::All => write!(f, "*"),
            HookMatcher::Exact(name) => write!(f, "{}", name),
            HookMatcher::Pattern(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

// ============================================================================
// Definitions
// ============================================================================

/// What a hook invokes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookKind {
    /// Local command run through `sh -c`
    Command { command: String },
    /// HTTP callback
    Url {
        url: String,
        method: String,
        headers: BTreeMap<String, String>,
    },
}

impl HookKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            HookKind::Command { .. } => "command",
            HookKind::Url { .. } => "url",
        }
    }

    /// Command line or URL, for logging
    pub fn target(&self) -> &str {
        match self {
            HookKind::Command { command } => command,
            HookKind::Url { url, .. } => url,
        }
    }
}

/// A single normalized hook
#[derive(Debug, Clone)]
pub struct HookDefinition {
    pub name: Option<String>,
    pub event: HookEventType,
    pub kind: HookKind,
    pub matcher: HookMatcher,
    pub blocking: bool,
    pub timeout: Duration,
    pub env: BTreeMap<String, String>,
}

impl HookDefinition {
    /// Label used in logs
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}:{}", self.kind.type_name(), self.kind.target()),
        }
    }
}

/// Canonical hook configuration: per-event hook lists in configuration order
#[derive(Debug, Clone, Default)]
pub struct HooksConfig {
    events: BTreeMap<HookEventType, Vec<HookDefinition>>,
}

impl HooksConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook to its event's list
    pub fn push(&mut self, hook: HookDefinition) {
        self.events.entry(hook.event).or_default().push(hook);
    }

    /// Hooks for an event, in configuration order
    pub fn for_event(&self, event: HookEventType) -> &[HookDefinition] {
        self.events.get(&event).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &HookDefinition> {
        self.events.values().flatten()
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let raw: RawHooks = serde_yaml::from_str(s)?;
        raw.normalize()
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let raw: RawHooks = serde_json::from_str(s).map_err(|e| {
            OrchestratorError::new(ErrorCode::CONFIG_PARSE_FAILED, e.to_string())
        })?;
        raw.normalize()
    }
}

impl<'de> Deserialize<'de> for HooksConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawHooks::deserialize(deserializer)?;
        raw.normalize().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Raw (on-disk) forms
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawHooks {
    Canonical(RawEventMap),
    Legacy(Vec<RawLegacyHook>),
}

/// Event keys with their matcher groups, in file order.
///
/// Aliases of one event (`PreToolUse`, `pre_tool_use`) merge in the order
/// they appear, which a sorted map would lose.
#[derive(Debug)]
struct RawEventMap(Vec<(String, Vec<RawMatcherGroup>)>);

impl<'de> Deserialize<'de> for RawEventMap {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EventMapVisitor;

        impl<'de> Visitor<'de> for EventMapVisitor {
            type Value = RawEventMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map from hook event to matcher groups")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<RawEventMap, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry()? {
                    entries.push(entry);
                }
                Ok(RawEventMap(entries))
            }
        }

        deserializer.deserialize_map(EventMapVisitor)
    }
}

#[derive(Debug, Deserialize)]
struct RawMatcherGroup {
    #[serde(default)]
    matcher: Option<String>,
    hooks: Vec<RawHookEntry>,
}

#[derive(Debug, Deserialize)]
struct RawLegacyHook {
    event: String,
    #[serde(default)]
    matcher: Option<String>,
    #[serde(flatten)]
    entry: RawHookEntry,
}

#[derive(Debug, Deserialize)]
struct RawHookEntry {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    blocking: Option<bool>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

impl RawHooks {
    fn normalize(self) -> Result<HooksConfig> {
        let mut config = HooksConfig::new();

        match self {
            RawHooks::Canonical(RawEventMap(events)) => {
                for (event, groups) in events {
                    let event: HookEventType = event.parse()?;
                    for group in groups {
                        let matcher = HookMatcher::parse(group.matcher.as_deref())?;
                        for entry in group.hooks {
                            config.push(entry.into_definition(event, matcher.clone())?);
                        }
                    }
                }
            }
            RawHooks::Legacy(hooks) => {
                tracing::debug!("Normalizing {} legacy hook entries", hooks.len());
                for hook in hooks {
                    let event: HookEventType = hook.event.parse()?;
                    let matcher = HookMatcher::parse(hook.matcher.as_deref())?;
                    config.push(hook.entry.into_definition(event, matcher)?);
                }
            }
        }

        Ok(config)
    }
}

impl RawHookEntry {
    fn into_definition(self, event: HookEventType, matcher: HookMatcher) -> Result<HookDefinition> {
        let invalid = |msg: String| OrchestratorError::new(ErrorCode::CONFIG_INVALID, msg);

        // `type` may be omitted when only one of command/url is present
        let kind_name = match (self.kind.as_deref(), &self.command, &self.url) {
            (Some(kind), _, _) => kind.to_lowercase(),
            (None, Some(_), None) => "command".to_string(),
            (None, None, Some(_)) => "url".to_string(),
            _ => {
                return Err(invalid(format!(
                    "{} hook must set exactly one of `command` or `url`",
                    event
                )))
            }
        };

        let kind = match kind_name.as_str() {
            "command" => HookKind::Command {
                command: self
                    .command
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| invalid(format!("{} command hook has no `command`", event)))?,
            },
            "url" | "http" => HookKind::Url {
                url: self
                    .url
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| invalid(format!("{} url hook has no `url`", event)))?,
                method: self
                    .method
                    .map(|m| m.to_uppercase())
                    .unwrap_or_else(|| "POST".to_string()),
                headers: self.headers,
            },
            other => return Err(invalid(format!("Unknown hook type: {}", other))),
        };

        let timeout = match (self.timeout_ms, &kind) {
            (Some(ms), _) => Duration::from_millis(ms),
            (None, HookKind::Command { .. }) => DEFAULT_COMMAND_HOOK_TIMEOUT,
            (None, HookKind::Url { .. }) => DEFAULT_URL_HOOK_TIMEOUT,
        };

        Ok(HookDefinition {
            name: self.name,
            event,
            kind,
            matcher,
            blocking: self.blocking.unwrap_or_else(|| event.default_blocking()),
            timeout,
            env: self.env,
        })
    }
}
