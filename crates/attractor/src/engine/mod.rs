//! Wires a graph, its transforms, a handler registry, and an event bus
//! into a single runnable pipeline.

pub mod loop_core;
pub mod routing;

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};
use crate::events::EventBus;
use crate::graph::{AttrValue, Graph};
use crate::handler::{HandlerRegistry, Outcome};
use crate::run_directory::{Manifest, RunDirectory};
use crate::transform::TransformRegistry;
use crate::validation::validate_or_raise;

/// Everything a run needs beyond the graph itself: where to write
/// artifacts, which handlers and transforms to dispatch through, and
/// where to publish events.
///
/// [`EngineConfig::new`] preloads every dependency-free handler and the
/// default transforms. The `parallel` and `wait_human` handlers are left
/// unregistered — they need an `Arc<HandlerRegistry>` and an
/// `Arc<dyn Interviewer>` respectively, which only the caller can supply;
/// register them on `registry` before running a graph that uses them.
pub struct EngineConfig {
    pub logs_root: PathBuf,
    pub registry: HandlerRegistry,
    pub transforms: TransformRegistry,
    pub events: Arc<EventBus>,
    pub skip_validation: bool,
}

impl EngineConfig {
    #[must_use]
    pub fn new(logs_root: impl Into<PathBuf>) -> Self {
        Self {
            logs_root: logs_root.into(),
            registry: HandlerRegistry::with_defaults(),
            transforms: TransformRegistry::with_defaults(),
            events: Arc::new(EventBus::new()),
            skip_validation: false,
        }
    }
}

fn generate_run_id() -> String {
    format!("run-{}", uuid::Uuid::new_v4())
}

fn create_run_dir(config: &EngineConfig, run_id: &str, graph: &Graph) -> PipelineResult<RunDirectory> {
    let run_dir = RunDirectory::create(config.logs_root.join(run_id))?;
    let manifest = Manifest {
        name: graph.attrs.get("name").map(AttrValue::as_str).unwrap_or_else(|| "pipeline".to_string()),
        goal: graph.attrs.get("goal").map(AttrValue::as_str).unwrap_or_default(),
        start_time: chrono::Utc::now().to_rfc3339(),
    };
    run_dir.write_manifest(&manifest)?;
    Ok(run_dir)
}

/// Apply `config`'s transforms, validate (unless `skip_validation`), and
/// run the resulting graph from its start node to completion or
/// unrecovered failure.
pub async fn run(graph: &Graph, config: &EngineConfig) -> PipelineResult<Outcome> {
    let mut prepared = graph.clone();
    config.transforms.apply_all(&mut prepared)?;
    if !config.skip_validation {
        validate_or_raise(&prepared, &[])?;
    }

    let run_id = generate_run_id();
    let run_dir = create_run_dir(config, &run_id, &prepared)?;
    loop_core::run_loop(&prepared, config, run_id, run_dir).await
}

/// Resume a run from its last saved checkpoint. Transforms are re-applied
/// (they're idempotent over an already-transformed graph) but validation
/// is skipped — the graph already ran once under this same config.
///
/// Artifacts for the resumed run land in a fresh `<logs_root>/<new run
/// id>/` directory rather than the original run's directory; the checkpoint
/// being resumed from is read from the original run's own
/// `<logs_root>/<run_id>/checkpoint.json`.
pub async fn resume(graph: &Graph, config: &EngineConfig, run_id: &str) -> PipelineResult<Outcome> {
    let checkpoints = crate::checkpoint::CheckpointManager::new(&config.logs_root);
    let checkpoint = checkpoints
        .load(run_id)
        .await?
        .ok_or_else(|| PipelineError::Checkpoint { message: format!("no checkpoint found for run '{run_id}'") })?;

    let mut prepared = graph.clone();
    config.transforms.apply_all(&mut prepared)?;

    let resumed_run_id = generate_run_id();
    let run_dir = create_run_dir(config, &resumed_run_id, &prepared)?;
    loop_core::resume_loop(&prepared, config, run_dir, checkpoint).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AttrMap, Edge, Node};
    use crate::types::{HandlerType, OutcomeStatus};

    fn linear_graph() -> Graph {
        let mut g = Graph::new();
        g.add_node(Node { id: "start".into(), handler_type: HandlerType::Start, attrs: AttrMap::new() });
        g.add_node(Node { id: "work".into(), handler_type: HandlerType::Codergen, attrs: AttrMap::new() });
        g.add_node(Node { id: "done".into(), handler_type: HandlerType::Exit, attrs: AttrMap::new() });
        g.add_edge(Edge { from: "start".into(), to: "work".into(), label: None, attrs: AttrMap::new() });
        g.add_edge(Edge { from: "work".into(), to: "done".into(), label: None, attrs: AttrMap::new() });
        g
    }

    fn test_logs_root() -> PathBuf {
        std::env::temp_dir().join(format!("attractor-engine-test-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn runs_a_linear_pipeline_to_completion() {
        let graph = linear_graph();
        let logs_root = test_logs_root();
        let config = EngineConfig::new(&logs_root);
        let outcome = run(&graph, &config).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);
        std::fs::remove_dir_all(&logs_root).ok();
    }

    #[tokio::test]
    async fn missing_start_node_is_a_structural_error() {
        let mut g = Graph::new();
        g.add_node(Node { id: "done".into(), handler_type: HandlerType::Exit, attrs: AttrMap::new() });
        let logs_root = test_logs_root();
        let mut config = EngineConfig::new(&logs_root);
        config.skip_validation = true;
        let result = run(&g, &config).await;
        assert!(matches!(result, Err(PipelineError::Structural { .. })));
        std::fs::remove_dir_all(&logs_root).ok();
    }

    #[tokio::test]
    async fn invalid_graphs_are_rejected_before_execution() {
        // No start node and validation left on: caught by the "start_node"
        // lint rule before the loop ever runs, not by the loop's own check.
        let mut g = Graph::new();
        g.add_node(Node { id: "done".into(), handler_type: HandlerType::Exit, attrs: AttrMap::new() });
        let logs_root = test_logs_root();
        let config = EngineConfig::new(&logs_root);
        let result = run(&g, &config).await;
        assert!(matches!(result, Err(PipelineError::Structural { .. })));
        std::fs::remove_dir_all(&logs_root).ok();
    }

    #[tokio::test]
    async fn resume_continues_from_a_saved_checkpoint() {
        let graph = linear_graph();
        let logs_root = test_logs_root();
        let config = EngineConfig::new(&logs_root);

        // Simulate an interrupted run: "work" already completed and a
        // checkpoint says "done" is next, as if the process died right
        // after recording that checkpoint.
        let run_id = "seed-run".to_string();
        let checkpoints = crate::checkpoint::CheckpointManager::new(&config.logs_root);
        let mut node_statuses = std::collections::HashMap::new();
        node_statuses.insert("work".to_string(), "success".to_string());
        let checkpoint = crate::checkpoint::Checkpoint::new(run_id.clone(), "work", std::collections::HashMap::new(), vec!["start".into(), "work".into()])
            .with_next_node("done")
            .with_node_statuses(node_statuses);
        checkpoints.save(&checkpoint).await.unwrap();

        let outcome = resume(&graph, &config, &run_id).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);
        std::fs::remove_dir_all(&logs_root).ok();
    }

    #[tokio::test]
    async fn resume_with_unknown_run_id_fails() {
        let graph = linear_graph();
        let logs_root = test_logs_root();
        let config = EngineConfig::new(&logs_root);
        let result = resume(&graph, &config, "no-such-run").await;
        assert!(matches!(result, Err(PipelineError::Checkpoint { .. })));
        std::fs::remove_dir_all(&logs_root).ok();
    }
}
