//! Parallel handler: fans out to every outgoing edge concurrently, each
//! branch walking its own subgraph with an isolated context clone until it
//! hits the structurally-common convergence node (or a dead end).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;

use crate::context::PipelineContext;
use crate::edge_selection::select_edge;
use crate::error::PipelineResult;
use crate::graph::{Graph, Node};
use crate::handler::{Handler, HandlerRegistry, Outcome};
use crate::retry::{execute_with_retry, policy_for_node};
use crate::types::{HandlerType, OutcomeStatus};

pub const DEFAULT_MAX_PARALLEL: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPolicy {
    WaitAll,
    FirstSuccess,
}

impl JoinPolicy {
    fn from_attr(value: Option<&str>) -> Self {
        match value {
            Some("first_success") => Self::FirstSuccess,
            _ => Self::WaitAll,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    Continue,
    FailFast,
}

impl ErrorPolicy {
    fn from_attr(value: Option<&str>) -> Self {
        match value {
            Some("fail_fast") => Self::FailFast,
            _ => Self::Continue,
        }
    }
}

/// A single branch's terminal outcome, keyed by the edge it started from.
#[derive(Debug, Clone)]
pub struct BranchOutcome {
    pub target: String,
    pub outcome: Outcome,
}

pub struct ParallelHandler {
    registry: Arc<HandlerRegistry>,
}

impl std::fmt::Debug for ParallelHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelHandler").finish_non_exhaustive()
    }
}

impl ParallelHandler {
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }
}

/// Walk forward from `start`, running each node to completion and
/// applying its context updates, until reaching `stop_at`, an exit node,
/// or a node with no viable outgoing edge.
async fn run_branch(executor: &ParallelHandler, start: &str, context: PipelineContext, graph: &Graph, logs_root: &Path, stop_at: Option<&str>) -> Outcome {
    let mut current_id = start.to_string();
    let mut last_outcome = Outcome::success();

    loop {
        if Some(current_id.as_str()) == stop_at {
            break;
        }
        let Some(node) = graph.node(&current_id) else {
            last_outcome = Outcome::fail(format!("branch reached unknown node '{current_id}'"));
            break;
        };
        if node.handler_type == HandlerType::Exit {
            break;
        }

        let policy = policy_for_node(node, graph);
        let allow_partial = node.get("allow_partial").and_then(crate::graph::AttrValue::as_bool).unwrap_or(false);
        let partial_on_panic = allow_partial.then(Outcome::partial_success);
        let node_owned = node.clone();
        let ctx_owned = context.clone();
        let graph_owned = graph.clone();
        let logs_root_owned = logs_root.to_path_buf();
        let registry = Arc::clone(&executor.registry);

        let attempt_result = execute_with_retry(&policy, &current_id, partial_on_panic, move |_attempt| {
            let node_owned = node_owned.clone();
            let ctx_owned = ctx_owned.clone();
            let graph_owned = graph_owned.clone();
            let logs_root_owned = logs_root_owned.clone();
            let registry = Arc::clone(&registry);
            async move {
                match registry.get(node_owned.handler_type) {
                    Some(handler) => handler.execute(&node_owned, &ctx_owned, &graph_owned, &logs_root_owned).await,
                    None => Err(crate::error::PipelineError::Structural { message: format!("no handler registered for node '{}'", node_owned.id) }),
                }
            }
        })
        .await;

        last_outcome = match attempt_result {
            Ok(outcome) => outcome,
            Err(err) => Outcome::fail(err.to_string()),
        };

        if !last_outcome.context_updates.is_empty() {
            for (key, value) in &last_outcome.context_updates {
                context.set(key, value.clone()).await;
            }
        }

        if last_outcome.status == OutcomeStatus::Fail {
            break;
        }

        match select_edge(graph, &current_id, &last_outcome, &context).await {
            Some(next) => current_id = next,
            None => break,
        }
    }

    last_outcome
}

#[async_trait]
impl Handler for ParallelHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::Parallel
    }

    async fn execute(&self, node: &Node, context: &PipelineContext, graph: &Graph, logs_root: &Path) -> PipelineResult<Outcome> {
        let edges = graph.outgoing(&node.id);
        if edges.is_empty() {
            return Ok(Outcome::fail("parallel node has no outgoing edges"));
        }

        let join_policy = JoinPolicy::from_attr(node.get_str("join_policy").as_deref());
        let error_policy = ErrorPolicy::from_attr(node.get_str("error_policy").as_deref());
        let max_parallel = node.get("max_parallel").and_then(crate::graph::AttrValue::as_f64).map(|n| n as usize).filter(|n| *n > 0).unwrap_or(DEFAULT_MAX_PARALLEL);

        let branch_heads: Vec<String> = edges.iter().map(|e| e.to.clone()).collect();
        let convergence = graph.find_common_convergence(&branch_heads);

        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let logs_root: PathBuf = logs_root.to_path_buf();
        let halted = Arc::new(AtomicBool::new(false));

        let futures: FuturesUnordered<_> = branch_heads
            .iter()
            .cloned()
            .map(|target| {
                let sem = Arc::clone(&semaphore);
                let branch_context = context.clone_context();
                let graph = graph.clone();
                let logs_root = logs_root.clone();
                let stop_at = convergence.clone();
                let halted = Arc::clone(&halted);
                async move {
                    let Ok(_permit) = sem.acquire_owned().await else {
                        return BranchOutcome { target, outcome: Outcome::fail("concurrency semaphore closed") };
                    };
                    if halted.load(Ordering::Acquire) {
                        return BranchOutcome { target, outcome: Outcome::skipped() };
                    }
                    let branch_context = branch_context.await;
                    let outcome = run_branch(self, &target, branch_context, &graph, &logs_root, stop_at.as_deref()).await;
                    BranchOutcome { target, outcome }
                }
            })
            .collect();

        let mut results = drain(futures, join_policy, error_policy, &halted).await;
        let authoring_order: std::collections::HashMap<&str, usize> = branch_heads.iter().enumerate().map(|(i, t)| (t.as_str(), i)).collect();
        results.sort_by_key(|r| authoring_order.get(r.target.as_str()).copied().unwrap_or(usize::MAX));

        let results_json: Vec<serde_json::Value> = results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "target": r.target,
                    "outcome": r.outcome.status.as_str(),
                    "notes": r.outcome.notes,
                    "score": branch_score(&r.outcome),
                })
            })
            .collect();
        context.set("parallel.results", serde_json::Value::Array(results_json)).await;

        let mut outcome = evaluate_join(&results, join_policy);
        if let Some(next) = convergence {
            outcome.suggested_next_ids = vec![next];
        }
        Ok(outcome)
    }
}

/// Drains every branch future to completion. `first_success` still cuts the
/// wait short on the first success. `fail_fast` never cancels an in-flight
/// branch; it only flips `halted` so branches still waiting on the
/// concurrency semaphore skip their run instead of starting.
async fn drain(
    mut futures: FuturesUnordered<impl std::future::Future<Output = BranchOutcome>>,
    join: JoinPolicy,
    error: ErrorPolicy,
    halted: &AtomicBool,
) -> Vec<BranchOutcome> {
    let mut results = Vec::new();
    while let Some(branch) = futures.next().await {
        if join == JoinPolicy::FirstSuccess && branch.outcome.status == OutcomeStatus::Success {
            results.push(branch);
            break;
        }
        if error == ErrorPolicy::FailFast && branch.outcome.status == OutcomeStatus::Fail {
            halted.store(true, Ordering::Release);
        }
        results.push(branch);
    }
    results
}

/// A coarse tiebreaker for fan-in ranking: full credit for success, partial
/// credit for a partial success, nothing otherwise.
fn branch_score(outcome: &Outcome) -> f64 {
    match outcome.status {
        OutcomeStatus::Success => 1.0,
        OutcomeStatus::PartialSuccess => 0.5,
        _ => 0.0,
    }
}

fn evaluate_join(results: &[BranchOutcome], join: JoinPolicy) -> Outcome {
    let success_count = results.iter().filter(|r| r.outcome.status == OutcomeStatus::Success).count();
    let fail_count = results.iter().filter(|r| r.outcome.status == OutcomeStatus::Fail).count();

    let base = match join {
        JoinPolicy::WaitAll => {
            if fail_count == 0 {
                Outcome::success()
            } else if success_count > 0 {
                Outcome::partial_success()
            } else {
                Outcome::fail(format!("all {fail_count} branches failed"))
            }
        }
        JoinPolicy::FirstSuccess => {
            if success_count > 0 {
                Outcome::success()
            } else {
                Outcome::fail("no branch succeeded")
            }
        }
    };

    base.with_context_update("parallel.success_count", success_count as f64).with_context_update("parallel.fail_count", fail_count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AttrMap, Edge};
    use crate::handler::HandlerRegistry;
    use crate::handlers::{CodergenHandler, ExitHandler, StartHandler};

    fn registry() -> Arc<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();
        registry.register(StartHandler);
        registry.register(ExitHandler);
        registry.register(CodergenHandler::simulation());
        Arc::new(registry)
    }

    fn diamond_graph() -> Graph {
        let mut g = Graph::new();
        g.add_node(Node { id: "p".into(), handler_type: HandlerType::Parallel, attrs: AttrMap::new() });
        g.add_node(Node { id: "a".into(), handler_type: HandlerType::Codergen, attrs: AttrMap::new() });
        g.add_node(Node { id: "b".into(), handler_type: HandlerType::Codergen, attrs: AttrMap::new() });
        g.add_node(Node { id: "done".into(), handler_type: HandlerType::Exit, attrs: AttrMap::new() });
        g.add_edge(Edge { from: "p".into(), to: "a".into(), label: None, attrs: AttrMap::new() });
        g.add_edge(Edge { from: "p".into(), to: "b".into(), label: None, attrs: AttrMap::new() });
        g.add_edge(Edge { from: "a".into(), to: "done".into(), label: None, attrs: AttrMap::new() });
        g.add_edge(Edge { from: "b".into(), to: "done".into(), label: None, attrs: AttrMap::new() });
        g
    }

    #[tokio::test]
    async fn branches_run_and_jump_to_the_common_convergence_node() {
        let handler = ParallelHandler::new(registry());
        let graph = diamond_graph();
        let node = graph.node("p").unwrap().clone();
        let ctx = PipelineContext::in_memory("r");
        let logs_root = std::env::temp_dir().join(format!("attractor-parallel-test-{}", uuid::Uuid::new_v4()));
        let outcome = handler.execute(&node, &ctx, &graph, &logs_root).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.suggested_next_ids, vec!["done".to_string()]);
        let results = ctx.get("parallel.results").await.unwrap();
        assert_eq!(results.as_array().unwrap().len(), 2);
        std::fs::remove_dir_all(&logs_root).ok();
    }

    /// Sleeps for a fixed duration before succeeding, so a test can make a
    /// later-authored branch finish first.
    struct SlowHandler {
        delay: std::time::Duration,
    }

    #[async_trait]
    impl Handler for SlowHandler {
        fn handler_type(&self) -> HandlerType {
            HandlerType::Codergen
        }

        async fn execute(&self, node: &Node, _context: &PipelineContext, _graph: &Graph, _logs_root: &std::path::Path) -> PipelineResult<Outcome> {
            if node.id == "a" {
                tokio::time::sleep(self.delay).await;
            }
            Ok(Outcome::success())
        }
    }

    #[tokio::test]
    async fn parallel_results_preserve_authoring_edge_order_regardless_of_completion_order() {
        let mut registry = HandlerRegistry::new();
        registry.register(ExitHandler);
        registry.register(SlowHandler { delay: std::time::Duration::from_millis(30) });
        let handler = ParallelHandler::new(Arc::new(registry));

        // "a" is authored first but finishes last; "b" is authored second
        // but has no delay, so it completes first.
        let mut g = Graph::new();
        g.add_node(Node { id: "p".into(), handler_type: HandlerType::Parallel, attrs: AttrMap::new() });
        g.add_node(Node { id: "a".into(), handler_type: HandlerType::Codergen, attrs: AttrMap::new() });
        g.add_node(Node { id: "b".into(), handler_type: HandlerType::Codergen, attrs: AttrMap::new() });
        g.add_edge(Edge { from: "p".into(), to: "a".into(), label: None, attrs: AttrMap::new() });
        g.add_edge(Edge { from: "p".into(), to: "b".into(), label: None, attrs: AttrMap::new() });

        let node = g.node("p").unwrap().clone();
        let ctx = PipelineContext::in_memory("r");
        let logs_root = std::env::temp_dir().join(format!("attractor-parallel-test-{}", uuid::Uuid::new_v4()));
        handler.execute(&node, &ctx, &g, &logs_root).await.unwrap();

        let results = ctx.get("parallel.results").await.unwrap();
        let targets: Vec<String> = results.as_array().unwrap().iter().map(|r| r["target"].as_str().unwrap().to_string()).collect();
        assert_eq!(targets, vec!["a".to_string(), "b".to_string()]);
        std::fs::remove_dir_all(&logs_root).ok();
    }

    #[tokio::test]
    async fn no_outgoing_edges_fails() {
        let handler = ParallelHandler::new(registry());
        let mut graph = Graph::new();
        graph.add_node(Node { id: "lonely".into(), handler_type: HandlerType::Parallel, attrs: AttrMap::new() });
        let node = graph.node("lonely").unwrap().clone();
        let ctx = PipelineContext::in_memory("r");
        let logs_root = std::env::temp_dir().join(format!("attractor-parallel-test-{}", uuid::Uuid::new_v4()));
        let outcome = handler.execute(&node, &ctx, &graph, &logs_root).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Fail);
    }

    #[tokio::test]
    async fn fail_fast_halts_queued_branches_but_lets_running_ones_finish() {
        let mut registry = HandlerRegistry::new();
        registry.register(ExitHandler);
        registry.register(crate::handlers::FailHandler);
        registry.register(SlowHandler { delay: std::time::Duration::from_millis(30) });
        let handler = ParallelHandler::new(Arc::new(registry));

        let mut attrs = AttrMap::new();
        attrs.insert("max_parallel".into(), crate::graph::AttrValue::Number(1.0));
        attrs.insert("error_policy".into(), crate::graph::AttrValue::String("fail_fast".into()));
        let mut g = Graph::new();
        g.add_node(Node { id: "p".into(), handler_type: HandlerType::Parallel, attrs });
        g.add_node(Node { id: "bad".into(), handler_type: HandlerType::Fail, attrs: AttrMap::new() });
        g.add_node(Node { id: "a".into(), handler_type: HandlerType::Codergen, attrs: AttrMap::new() });
        g.add_edge(Edge { from: "p".into(), to: "bad".into(), label: None, attrs: AttrMap::new() });
        g.add_edge(Edge { from: "p".into(), to: "a".into(), label: None, attrs: AttrMap::new() });

        let node = g.node("p").unwrap().clone();
        let ctx = PipelineContext::in_memory("r");
        let logs_root = std::env::temp_dir().join(format!("attractor-parallel-test-{}", uuid::Uuid::new_v4()));
        handler.execute(&node, &ctx, &g, &logs_root).await.unwrap();

        let results = ctx.get("parallel.results").await.unwrap();
        let by_target: std::collections::HashMap<String, String> = results
            .as_array()
            .unwrap()
            .iter()
            .map(|r| (r["target"].as_str().unwrap().to_string(), r["outcome"].as_str().unwrap().to_string()))
            .collect();
        assert_eq!(by_target["bad"], "fail");
        assert_eq!(by_target["a"], "skipped");
        std::fs::remove_dir_all(&logs_root).ok();
    }

    #[tokio::test]
    async fn a_failing_branch_among_successes_is_partial_success() {
        let mut registry = HandlerRegistry::new();
        registry.register(ExitHandler);
        registry.register(crate::handlers::FailHandler);
        registry.register(CodergenHandler::simulation());
        let handler = ParallelHandler::new(Arc::new(registry));

        let mut g = Graph::new();
        g.add_node(Node { id: "p".into(), handler_type: HandlerType::Parallel, attrs: AttrMap::new() });
        g.add_node(Node { id: "ok".into(), handler_type: HandlerType::Codergen, attrs: AttrMap::new() });
        g.add_node(Node { id: "bad".into(), handler_type: HandlerType::Fail, attrs: AttrMap::new() });
        g.add_edge(Edge { from: "p".into(), to: "ok".into(), label: None, attrs: AttrMap::new() });
        g.add_edge(Edge { from: "p".into(), to: "bad".into(), label: None, attrs: AttrMap::new() });

        let node = g.node("p").unwrap().clone();
        let ctx = PipelineContext::in_memory("r");
        let logs_root = std::env::temp_dir().join(format!("attractor-parallel-test-{}", uuid::Uuid::new_v4()));
        let outcome = handler.execute(&node, &ctx, &g, &logs_root).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::PartialSuccess);
        std::fs::remove_dir_all(&logs_root).ok();
    }
}
