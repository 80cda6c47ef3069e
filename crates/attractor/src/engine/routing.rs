//! Goal gate enforcement and failure routing.

use indexmap::IndexMap;

use crate::condition::{evaluate, ConditionContext};
use crate::context::PipelineContext;
use crate::graph::{AttrValue, Edge, Graph, Node};
use crate::handler::Outcome;
use crate::types::OutcomeStatus;

/// Result of checking goal gates before pipeline exit.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalGateResult {
    pub satisfied: bool,
    pub failed_node_id: Option<String>,
}

/// Check whether every visited goal-gate node has a successful outcome.
///
/// Only nodes present in `node_outcomes` are checked — a goal gate that
/// was never reached imposes no constraint. A node is a goal gate when
/// its `goal_gate` attribute is truthy; it is satisfied when its
/// recorded outcome is `success` or `partial_success`.
#[must_use]
pub fn check_goal_gates(graph: &Graph, node_outcomes: &IndexMap<String, Outcome>) -> GoalGateResult {
    for (node_id, outcome) in node_outcomes {
        let Some(node) = graph.node(node_id) else { continue };
        let is_gate = node.get("goal_gate").and_then(AttrValue::as_bool).unwrap_or(false);
        if !is_gate {
            continue;
        }
        let satisfied = matches!(outcome.status, OutcomeStatus::Success | OutcomeStatus::PartialSuccess);
        if !satisfied {
            return GoalGateResult { satisfied: false, failed_node_id: Some(node_id.clone()) };
        }
    }
    GoalGateResult { satisfied: true, failed_node_id: None }
}

/// Resolve a retry target for a failed node via the 4-level chain: node
/// `retry_target`, node `fallback_retry_target`, graph `retry_target`,
/// graph `fallback_retry_target`. Each candidate is validated against
/// the graph — an unknown target is skipped in favor of the next level.
#[must_use]
pub fn get_retry_target(node: &Node, graph: &Graph) -> Option<String> {
    let candidates = [
        node.get_str("retry_target"),
        node.get_str("fallback_retry_target"),
        graph.attrs.get("retry_target").map(AttrValue::as_str),
        graph.attrs.get("fallback_retry_target").map(AttrValue::as_str),
    ];

    candidates.into_iter().flatten().find(|target| graph.node(target).is_some())
}

/// Find an outgoing edge from `node_id` whose condition evaluates `true`
/// against a forced-fail outcome — a pipeline-authored failure path,
/// distinct from the node/graph-level retry-target chain.
pub async fn find_fail_edge<'a>(node_id: &str, graph: &'a Graph, outcome: &Outcome, context: &PipelineContext) -> Option<&'a Edge> {
    let snapshot = context.snapshot().await;
    let cond_ctx = ConditionContext {
        outcome_status: OutcomeStatus::Fail.as_str().to_string(),
        preferred_label: outcome.preferred_label.clone(),
        context: &snapshot,
    };

    graph.outgoing(node_id).into_iter().find(|e| e.condition().is_some_and(|c| !c.trim().is_empty() && evaluate(&c, &cond_ctx)))
}
