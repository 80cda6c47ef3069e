//! Codergen handler: runs LLM-backed code generation through a pluggable
//! [`CodergenBackend`], with a built-in simulation mode for pipelines that
//! have no backend wired in (the default).
//!
//! `$goal`-expansion is a graph-level transform applied before the engine
//! loop starts; this handler only expands the runtime variables
//! (`$last_output`, `$last_stage`, `$last_outcome`) that depend on what
//! already ran.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::graph::{Graph, Node};
use crate::handler::{Handler, Outcome};
use crate::run_directory::RunDirectory;
use crate::types::HandlerType;

/// What a backend hands back: either raw text (wrapped into a `SUCCESS`
/// outcome by this handler) or a fully-formed outcome it wants to return
/// verbatim.
pub enum CodergenOutput {
    Text(String),
    FullOutcome(Outcome),
}

/// Pluggable LLM backend powering codergen nodes.
#[async_trait]
pub trait CodergenBackend: Send + Sync {
    async fn run(&self, node: &Node, prompt: &str, context: &PipelineContext) -> PipelineResult<CodergenOutput>;
}

/// Default backend: returns a canned response without calling out to a
/// real model. Used whenever no backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulationBackend;

#[async_trait]
impl CodergenBackend for SimulationBackend {
    async fn run(&self, node: &Node, _prompt: &str, _context: &PipelineContext) -> PipelineResult<CodergenOutput> {
        Ok(CodergenOutput::Text(format!("[simulated] response for stage: {}", node.id)))
    }
}

pub struct CodergenHandler {
    backend: Arc<dyn CodergenBackend>,
}

impl std::fmt::Debug for CodergenHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodergenHandler").finish_non_exhaustive()
    }
}

impl Default for CodergenHandler {
    fn default() -> Self {
        Self::simulation()
    }
}

impl CodergenHandler {
    #[must_use]
    pub fn simulation() -> Self {
        Self { backend: Arc::new(SimulationBackend) }
    }

    #[must_use]
    pub fn with_backend(backend: Arc<dyn CodergenBackend>) -> Self {
        Self { backend }
    }
}

const RESPONSE_TRUNCATION_LIMIT: usize = 200;

fn truncate_output(s: &str) -> String {
    if s.len() <= RESPONSE_TRUNCATION_LIMIT {
        return s.to_string();
    }
    let boundary = s.char_indices().map(|(i, _)| i).take_while(|&i| i <= RESPONSE_TRUNCATION_LIMIT).last().unwrap_or(0);
    format!("{}...", &s[..boundary])
}

async fn expand_runtime_variables(prompt: &str, context: &PipelineContext) -> String {
    let mut result = prompt.to_string();
    if result.contains("$last_stage") {
        let value = context.get("last_stage").await.and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
        result = result.replace("$last_stage", &value);
    }
    if result.contains("$last_outcome") {
        let value = context.get("outcome").await.and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
        result = result.replace("$last_outcome", &value);
    }
    if result.contains("$last_output") {
        let value = context.get("last_output_full").await.and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
        result = result.replace("$last_output", &value);
    }
    result
}

fn build_text_outcome(node_id: &str, text: &str) -> Outcome {
    Outcome::success()
        .with_notes(format!("codergen completed for node '{node_id}'"))
        .with_context_update("last_stage", node_id.to_string())
        .with_context_update("last_output", truncate_output(text))
        .with_context_update("last_output_full", text.to_string())
}

#[async_trait]
impl Handler for CodergenHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::Codergen
    }

    async fn execute(&self, node: &Node, context: &PipelineContext, _graph: &Graph, logs_root: &Path) -> PipelineResult<Outcome> {
        let raw_prompt = node.get_str("prompt").unwrap_or_else(|| node.id.clone());
        let prompt = expand_runtime_variables(&raw_prompt, context).await;

        let run_dir = RunDirectory::open(logs_root);
        let stage_dir = run_dir.node_dir(&node.id);
        std::fs::create_dir_all(&stage_dir).map_err(crate::error::PipelineError::from_io)?;
        std::fs::write(stage_dir.join("input.md"), &prompt).map_err(crate::error::PipelineError::from_io)?;

        let response = match self.backend.run(node, &prompt, context).await {
            Ok(response) => response,
            Err(err) => {
                let outcome = Outcome::fail(format!("codergen backend error: {err}"));
                let _ = run_dir.write_status(&node.id, &outcome);
                return Ok(outcome);
            }
        };

        let outcome = match response {
            CodergenOutput::FullOutcome(outcome) => outcome,
            CodergenOutput::Text(text) => {
                std::fs::write(stage_dir.join("output.md"), &text).map_err(crate::error::PipelineError::from_io)?;
                build_text_outcome(&node.id, &text)
            }
        };
        let _ = run_dir.write_status(&node.id, &outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AttrMap;
    use crate::types::OutcomeStatus;
    use std::path::PathBuf;

    fn temp_logs_root() -> PathBuf {
        std::env::temp_dir().join(format!("attractor-codergen-test-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn simulation_mode_produces_a_canned_response() {
        let node = Node { id: "write_code".into(), handler_type: HandlerType::Codergen, attrs: AttrMap::new() };
        let ctx = PipelineContext::in_memory("r");
        let graph = Graph::new();
        let logs_root = temp_logs_root();
        let outcome = CodergenHandler::simulation().execute(&node, &ctx, &graph, &logs_root).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(outcome.context_updates.get("last_output_full").unwrap().as_str().unwrap().contains("write_code"));
        std::fs::remove_dir_all(&logs_root).ok();
    }

    #[tokio::test]
    async fn expands_last_output_from_context() {
        let mut attrs = AttrMap::new();
        attrs.insert("prompt".into(), crate::graph::AttrValue::String("continue from: $last_output".into()));
        let node = Node { id: "next".into(), handler_type: HandlerType::Codergen, attrs };
        let ctx = PipelineContext::in_memory("r");
        ctx.set("last_output_full", "previous result").await;
        let graph = Graph::new();
        let logs_root = temp_logs_root();
        let outcome = CodergenHandler::simulation().execute(&node, &ctx, &graph, &logs_root).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);
        let written = std::fs::read_to_string(logs_root.join("nodes").join("next").join("input.md")).unwrap();
        assert!(written.contains("previous result"));
        std::fs::remove_dir_all(&logs_root).ok();
    }

    struct FailingBackend;

    #[async_trait]
    impl CodergenBackend for FailingBackend {
        async fn run(&self, _node: &Node, _prompt: &str, _context: &PipelineContext) -> PipelineResult<CodergenOutput> {
            Err(crate::error::PipelineError::Terminal { node: "n".into(), message: "boom".into() })
        }
    }

    #[tokio::test]
    async fn backend_error_becomes_a_fail_outcome() {
        let node = Node { id: "n".into(), handler_type: HandlerType::Codergen, attrs: AttrMap::new() };
        let ctx = PipelineContext::in_memory("r");
        let graph = Graph::new();
        let logs_root = temp_logs_root();
        let outcome = CodergenHandler::with_backend(Arc::new(FailingBackend)).execute(&node, &ctx, &graph, &logs_root).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert!(outcome.failure_reason.unwrap().contains("boom"));
        std::fs::remove_dir_all(&logs_root).ok();
    }
}
