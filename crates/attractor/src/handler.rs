//! The seam between the engine's routing loop and a node's actual work.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::graph::{Graph, Node};
use crate::types::{HandlerType, OutcomeStatus};

/// What a handler hands back to the engine: a disposition plus whatever
/// routing hints and context writes go with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub preferred_label: Option<String>,
    pub suggested_next_ids: Vec<String>,
    pub context_updates: HashMap<String, Value>,
    pub notes: Option<String>,
    pub failure_reason: Option<String>,
}

impl Outcome {
    #[must_use]
    pub fn new(status: OutcomeStatus) -> Self {
        Self {
            status,
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::new(),
            notes: None,
            failure_reason: None,
        }
    }

    #[must_use]
    pub fn success() -> Self {
        Self::new(OutcomeStatus::Success)
    }

    #[must_use]
    pub fn partial_success() -> Self {
        Self::new(OutcomeStatus::PartialSuccess)
    }

    #[must_use]
    pub fn retry() -> Self {
        Self::new(OutcomeStatus::Retry)
    }

    #[must_use]
    pub fn skipped() -> Self {
        Self::new(OutcomeStatus::Skipped)
    }

    #[must_use]
    pub fn fail(reason: impl Into<String>) -> Self {
        let mut outcome = Self::new(OutcomeStatus::Fail);
        outcome.failure_reason = Some(reason.into());
        outcome
    }

    #[must_use]
    pub fn with_preferred_label(mut self, label: impl Into<String>) -> Self {
        self.preferred_label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_suggested_next_ids(mut self, ids: Vec<String>) -> Self {
        self.suggested_next_ids = ids;
        self
    }

    #[must_use]
    pub fn with_context_update(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context_updates.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// One node type's behavior. Implementations are registered against a
/// [`HandlerType`] and invoked once per visit to a node of that type.
///
/// `graph` gives handlers that need structural information (the parallel
/// handler's convergence search) access to the whole pipeline; `logs_root`
/// is the run's artifact directory for handlers that persist working
/// files (codergen prompts/responses, tool output).
#[async_trait]
pub trait Handler: Send + Sync {
    fn handler_type(&self) -> HandlerType;
    async fn execute(&self, node: &Node, context: &PipelineContext, graph: &Graph, logs_root: &Path) -> PipelineResult<Outcome>;
}

/// The table of handlers an engine run dispatches through.
///
/// Handlers are kept behind `Arc` rather than `Box` so a single resolved
/// handler can be cloned into a retry executor's spawned task without
/// borrowing the whole registry across an await point.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerType, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with handlers that need no runtime
    /// dependencies beyond what they construct themselves.
    ///
    /// `parallel` (needs an `Arc<HandlerRegistry>` for branch dispatch)
    /// and `wait_human` (needs an `Arc<dyn Interviewer>`) are left out;
    /// register them explicitly once those dependencies exist.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(crate::handlers::StartHandler);
        registry.register(crate::handlers::ExitHandler);
        registry.register(crate::handlers::ConditionalHandler);
        registry.register(crate::handlers::FailHandler);
        registry.register(crate::handlers::CodergenHandler::simulation());
        registry.register(crate::handlers::ToolHandler);
        registry.register(crate::handlers::FanInHandler);
        registry.register(crate::handlers::StackManagerHandler);
        registry
    }

    pub fn register(&mut self, handler: impl Handler + 'static) {
        self.handlers.insert(handler.handler_type(), Arc::new(handler));
    }

    #[must_use]
    pub fn get(&self, handler_type: HandlerType) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&handler_type).cloned()
    }
}
