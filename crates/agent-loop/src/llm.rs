//! Minimal LLM client abstraction.
//!
//! The processing loop issues a single, non-streaming `complete()` call per
//! round. No wire protocol is specified here — `LlmClient` is the seam a
//! host implements against whatever provider SDK it uses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, AgentResult};

/// A tool's name, description, and JSON Schema parameter shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    /// Reject obviously malformed definitions before they reach the registry.
    pub fn validate(&self) -> AgentResult<()> {
        if self.name.trim().is_empty() {
            return Err(AgentError::ValidationError {
                reason: "tool name must not be empty".into(),
            });
        }
        if self.description.trim().is_empty() {
            return Err(AgentError::ValidationError {
                reason: format!("tool {} must have a non-empty description", self.name),
            });
        }
        if !self.parameters.is_object() {
            return Err(AgentError::ValidationError {
                reason: format!("tool {} parameters must be a JSON object schema", self.name),
            });
        }
        Ok(())
    }
}

/// A single model-issued tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The result of running a tool call, fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: Value,
    pub is_error: bool,
}

/// Token accounting for a single completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Conversation roles in the lowered message form sent to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in the lowered request history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Whether the model may, must, or must not call a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

/// A single-call completion request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub reasoning_effort: Option<String>,
    pub provider: Option<String>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Abort,
    Other(String),
}

/// A completed response from the model.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub id: String,
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub reasoning: Option<String>,
    pub usage: Usage,
    pub finish_reason: FinishReason,
}

/// Errors the LLM transport can raise. Distinct from [`AgentError`] so a
/// host's provider adapter does not need to know this crate's error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited: {message}")]
    RateLimit { message: String },
    #[error("network error: {message}")]
    Network { message: String },
    #[error("authentication error: {message}")]
    Authentication { message: String },
    #[error("context length exceeded: {message}")]
    ContextLength { message: String },
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("provider error: {message}")]
    Provider { message: String },
    #[error("request aborted")]
    Abort,
}

impl LlmError {
    /// Whether a host's transport layer should have already retried this —
    /// if one reaches the session, it is treated as terminal either way.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::Network { .. })
    }
}

/// Abstraction over the LLM call for testability.
///
/// Production code wires this to a real provider SDK. Tests inject a fake
/// that returns predetermined responses.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}
