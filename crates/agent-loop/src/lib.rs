//! A session-scoped driver for a tool-using LLM coding agent: owns
//! conversation history, runs the submit/tool-call/respond cycle, and
//! exposes everything that happens as a typed event stream.

pub mod error;
pub mod events;
pub mod execution;
pub mod llm;
pub mod loop_detection;
pub mod profile;
pub mod registry;
pub mod session;
pub mod subagents;
pub mod truncation;
pub mod types;

pub use error::{AgentError, AgentResult};
pub use session::Session;
pub use types::{SessionConfig, SessionState, Turn};
