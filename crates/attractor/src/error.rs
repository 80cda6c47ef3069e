//! The pipeline engine's error type, split along the same retryable vs.
//! terminal line the retry policy uses to decide whether to try again.

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("transient failure in node {node}: {message}")]
    Transient { node: String, message: String },
    #[error("terminal failure in node {node}: {message}")]
    Terminal { node: String, message: String },

    #[error("graph structure error: {message}")]
    Structural { message: String },
    #[error("unknown node: {id}")]
    UnknownNode { id: String },
    #[error("unknown edge outcome '{outcome}' leaving node {node}")]
    UnknownOutcome { node: String, outcome: String },
    #[error("cycle detected involving node {node}")]
    Cycle { node: String },

    #[error("condition expression error: {message}")]
    Condition { message: String },
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("goal gate unsatisfied for node {node}: {message}")]
    GoalGateUnsatisfied { node: String, message: String },

    #[error("listener error: {message}")]
    Listener { message: String },

    #[error("checkpoint error: {message}")]
    Checkpoint { message: String },

    #[error("io error: {message}")]
    Io { message: String },
}

impl PipelineError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "TRANSIENT",
            Self::Terminal { .. } => "TERMINAL",
            Self::Structural { .. } => "STRUCTURAL",
            Self::UnknownNode { .. } => "UNKNOWN_NODE",
            Self::UnknownOutcome { .. } => "UNKNOWN_OUTCOME",
            Self::Cycle { .. } => "CYCLE",
            Self::Condition { .. } => "CONDITION_ERROR",
            Self::Parse { .. } => "PARSE_ERROR",
            Self::GoalGateUnsatisfied { .. } => "GOAL_GATE_UNSATISFIED",
            Self::Listener { .. } => "LISTENER_ERROR",
            Self::Checkpoint { .. } => "CHECKPOINT_ERROR",
            Self::Io { .. } => "IO_ERROR",
        }
    }

    #[must_use]
    pub fn from_io(err: std::io::Error) -> Self {
        Self::Io { message: err.to_string() }
    }
}
