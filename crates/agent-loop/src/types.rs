//! Session-facing data types: configuration, turn history, and events.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::llm::{ToolCall, ToolResult, Usage};

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

fn default_max_tool_rounds() -> u32 {
    200
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_max_command_timeout_ms() -> u64 {
    600_000
}

fn default_true() -> bool {
    true
}

fn default_loop_detection_window() -> u32 {
    10
}

fn default_max_subagent_depth() -> u32 {
    1
}

/// How much latitude the model gets to reason before answering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
    Custom(String),
}

impl ReasoningEffort {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Custom(s) => s,
        }
    }
}

impl std::fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavioral knobs for a [`crate::session::Session`]. Every field has a
/// default so a caller only needs to override what matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 0 means unlimited.
    #[serde(default)]
    pub max_turns: u32,
    /// 0 means unlimited. Caps tool-calling rounds within a single `submit`.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds_per_input: u32,
    #[serde(default = "default_command_timeout_ms")]
    pub default_command_timeout_ms: u64,
    #[serde(default = "default_max_command_timeout_ms")]
    pub max_command_timeout_ms: u64,
    #[serde(default)]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub tool_output_limits: HashMap<String, usize>,
    #[serde(default)]
    pub tool_line_limits: HashMap<String, usize>,
    #[serde(default = "default_true")]
    pub enable_loop_detection: bool,
    #[serde(default = "default_loop_detection_window")]
    pub loop_detection_window: u32,
    #[serde(default = "default_max_subagent_depth")]
    pub max_subagent_depth: u32,
    #[serde(default)]
    pub user_instructions: Option<String>,
    #[serde(default = "default_true")]
    pub auto_detect_awaiting_input: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: 0,
            max_tool_rounds_per_input: default_max_tool_rounds(),
            default_command_timeout_ms: default_command_timeout_ms(),
            max_command_timeout_ms: default_max_command_timeout_ms(),
            reasoning_effort: None,
            tool_output_limits: HashMap::new(),
            tool_line_limits: HashMap::new(),
            enable_loop_detection: true,
            loop_detection_window: default_loop_detection_window(),
            max_subagent_depth: default_max_subagent_depth(),
            user_instructions: None,
            auto_detect_awaiting_input: true,
        }
    }
}

impl SessionConfig {
    /// Derive a child session's configuration, inheriting behavioral
    /// settings but not the parent's per-call overrides.
    #[must_use]
    pub fn for_child(&self, max_subagent_depth: u32) -> Self {
        Self {
            max_turns: self.max_turns,
            max_tool_rounds_per_input: self.max_tool_rounds_per_input,
            default_command_timeout_ms: self.default_command_timeout_ms,
            max_command_timeout_ms: self.max_command_timeout_ms,
            reasoning_effort: None,
            tool_output_limits: self.tool_output_limits.clone(),
            tool_line_limits: self.tool_line_limits.clone(),
            enable_loop_detection: self.enable_loop_detection,
            loop_detection_window: self.loop_detection_window,
            max_subagent_depth,
            user_instructions: None,
            auto_detect_awaiting_input: self.auto_detect_awaiting_input,
        }
    }
}

/// A session's coarse lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Processing,
    AwaitingInput,
    Closed,
}

/// One entry in a session's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    User {
        content: String,
        timestamp: String,
    },
    Assistant {
        content: String,
        tool_calls: Vec<ToolCall>,
        reasoning: Option<String>,
        usage: Usage,
        response_id: Option<String>,
        timestamp: String,
    },
    ToolResults {
        results: Vec<ToolResult>,
        timestamp: String,
    },
    System {
        content: String,
        timestamp: String,
    },
    Steering {
        content: String,
        timestamp: String,
    },
}

impl Turn {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
            timestamp: now_timestamp(),
        }
    }

    #[must_use]
    pub fn assistant(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
        reasoning: Option<String>,
        usage: Usage,
        response_id: Option<String>,
    ) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls,
            reasoning,
            usage,
            response_id,
            timestamp: now_timestamp(),
        }
    }

    #[must_use]
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::ToolResults {
            results,
            timestamp: now_timestamp(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
            timestamp: now_timestamp(),
        }
    }

    #[must_use]
    pub fn steering(content: impl Into<String>) -> Self {
        Self::Steering {
            content: content.into(),
            timestamp: now_timestamp(),
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> &str {
        match self {
            Self::User { timestamp, .. }
            | Self::Assistant { timestamp, .. }
            | Self::ToolResults { timestamp, .. }
            | Self::System { timestamp, .. }
            | Self::Steering { timestamp, .. } => timestamp,
        }
    }
}

/// The outcome of a shell command run through an [`crate::execution::ExecutionEnvironment`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration_ms: u64,
}

/// A directory listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: Option<u64>,
}

/// Options constraining a `grep` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrepOptions {
    #[serde(default)]
    pub glob_filter: Option<String>,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default = "default_max_grep_results")]
    pub max_results: u32,
}

fn default_max_grep_results() -> u32 {
    100
}

impl Default for GrepOptions {
    fn default() -> Self {
        Self {
            glob_filter: None,
            case_insensitive: false,
            max_results: default_max_grep_results(),
        }
    }
}

/// The closed set of event kinds a session can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    SessionStart,
    SessionEnd,
    UserInput,
    LlmCallStart,
    LlmCallEnd,
    ToolCallStart,
    ToolCallEnd,
    SteeringInjected,
    TurnComplete,
    TurnLimit,
    LoopDetection,
    Warning,
    Error,
    SubagentSpawn,
    SubagentComplete,
    Info,
}

/// One emitted event, timestamped and tagged with its originating session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: EventKind,
    pub timestamp: String,
    pub session_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}
