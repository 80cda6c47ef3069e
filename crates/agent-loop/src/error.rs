//! The agent loop's error type, split into tool-level and session-level
//! failures so callers can decide what should end a turn versus end a
//! session.

use serde::{Serialize, Serializer};

use crate::llm::LlmError;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("file not found: {path}")]
    FileNotFound { path: String },
    #[error("edit conflict: {reason}")]
    EditConflict { reason: String },
    #[error("shell command timed out after {timeout_ms}ms")]
    ShellTimeout { timeout_ms: u64 },
    #[error("shell command exited with code {code}: {stderr}")]
    ShellExitError { code: i32, stderr: String },
    #[error("permission denied: {path}")]
    PermissionDenied { path: String },
    #[error("validation error: {reason}")]
    ValidationError { reason: String },
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("io error: {message}")]
    Io { message: String },

    #[error("session is closed")]
    SessionClosed,
    #[error("invalid session state: expected {expected}, actual {actual}")]
    InvalidState { expected: String, actual: String },
    #[error("turn limit exceeded: {message}")]
    TurnLimitExceeded { message: String },
    #[error("context length exceeded: {message}")]
    ContextLengthExceeded { message: String },

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl AgentError {
    /// Errors raised while executing one tool call, as opposed to failures
    /// of the session as a whole.
    #[must_use]
    pub fn is_tool_error(&self) -> bool {
        match self {
            Self::FileNotFound { .. }
            | Self::EditConflict { .. }
            | Self::ShellTimeout { .. }
            | Self::ShellExitError { .. }
            | Self::PermissionDenied { .. }
            | Self::ValidationError { .. }
            | Self::UnknownTool { .. }
            | Self::Io { .. } => true,
            Self::SessionClosed
            | Self::InvalidState { .. }
            | Self::TurnLimitExceeded { .. }
            | Self::ContextLengthExceeded { .. }
            | Self::Llm(_) => false,
        }
    }

    #[must_use]
    pub fn is_session_error(&self) -> bool {
        match self {
            Self::SessionClosed
            | Self::InvalidState { .. }
            | Self::TurnLimitExceeded { .. }
            | Self::ContextLengthExceeded { .. } => true,
            Self::Llm(e) => !e.is_retryable(),
            Self::FileNotFound { .. }
            | Self::EditConflict { .. }
            | Self::ShellTimeout { .. }
            | Self::ShellExitError { .. }
            | Self::PermissionDenied { .. }
            | Self::ValidationError { .. }
            | Self::UnknownTool { .. }
            | Self::Io { .. } => false,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::FileNotFound { .. } => "FILE_NOT_FOUND",
            Self::EditConflict { .. } => "EDIT_CONFLICT",
            Self::ShellTimeout { .. } => "SHELL_TIMEOUT",
            Self::ShellExitError { .. } => "SHELL_EXIT_ERROR",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::UnknownTool { .. } => "UNKNOWN_TOOL",
            Self::Io { .. } => "IO_ERROR",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::TurnLimitExceeded { .. } => "TURN_LIMIT_EXCEEDED",
            Self::ContextLengthExceeded { .. } => "CONTEXT_LENGTH_EXCEEDED",
            Self::Llm(_) => "LLM_ERROR",
        }
    }

    #[must_use]
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound { path: path.into() },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path: path.into() },
            _ => Self::Io {
                message: err.to_string(),
            },
        }
    }
}

impl Serialize for AgentError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("AgentError", 2)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}
