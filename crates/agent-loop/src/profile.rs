//! Capability description for the model a session is talking to.
//!
//! Prompt assembly and provider-specific tool wiring live outside this
//! crate; a profile only answers the questions the processing loop needs
//! to make dispatch decisions.

use std::fmt;

/// What a given model/provider combination supports.
pub trait ProviderProfile: fmt::Debug + Send + Sync {
    fn id(&self) -> &str;
    fn model(&self) -> &str;

    /// Whether independent tool calls within one round may run concurrently.
    fn supports_parallel_tool_calls(&self) -> bool;

    /// Used by the context-usage warning heuristic.
    fn context_window_size(&self) -> u64;

    /// Produce a profile for a child session, optionally pointed at a
    /// different model than the parent's. `None` clones the parent's model
    /// unchanged.
    fn clone_profile(&self, model_override: Option<&str>) -> Box<dyn ProviderProfile>;
}

/// A profile whose answers don't change at runtime.
#[derive(Debug, Clone)]
pub struct StaticProfile {
    id: String,
    model: String,
    supports_parallel_tool_calls: bool,
    context_window_size: u64,
}

impl StaticProfile {
    #[must_use]
    pub fn new(id: impl Into<String>, model: impl Into<String>, context_window_size: u64) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            supports_parallel_tool_calls: true,
            context_window_size,
        }
    }

    #[must_use]
    pub fn with_parallel_tool_calls(mut self, supported: bool) -> Self {
        self.supports_parallel_tool_calls = supported;
        self
    }
}

impl ProviderProfile for StaticProfile {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_parallel_tool_calls(&self) -> bool {
        self.supports_parallel_tool_calls
    }

    fn context_window_size(&self) -> u64 {
        self.context_window_size
    }

    fn clone_profile(&self, model_override: Option<&str>) -> Box<dyn ProviderProfile> {
        let mut cloned = self.clone();
        if let Some(model) = model_override {
            cloned.model = model.to_string();
        }
        Box::new(cloned)
    }
}
