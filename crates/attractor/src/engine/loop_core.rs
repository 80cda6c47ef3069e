//! The main traversal loop: resolve a start node, dispatch through
//! handlers with retry, checkpoint after every stage, and route onward via
//! goal gates, forced-fail edges, or ordinary edge selection.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::context::PipelineContext;
use crate::edge_selection::select_edge;
use crate::engine::routing::{check_goal_gates, find_fail_edge, get_retry_target, GoalGateResult};
use crate::engine::EngineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{PipelineEvent, PipelineEventKind};
use crate::graph::AttrValue;
use crate::graph::Graph;
use crate::graph::Node;
use crate::handler::Outcome;
use crate::retry::{execute_with_retry, policy_for_node};
use crate::run_directory::RunDirectory;
use crate::types::{HandlerType, OutcomeStatus};

/// Progress through a single run: what's been visited, what each node
/// returned, and how many times each node has been retried across resumes.
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    pub current_node_id: String,
    pub completed_nodes: Vec<String>,
    pub node_outcomes: IndexMap<String, Outcome>,
    pub node_retries: HashMap<String, u32>,
    pub stage_index: usize,
}

fn event_data(pairs: Vec<(&str, serde_json::Value)>) -> HashMap<String, serde_json::Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Run a pipeline from its start node through to completion or
/// unrecovered failure.
pub async fn run_loop(graph: &Graph, config: &EngineConfig, run_id: String, run_dir: RunDirectory) -> PipelineResult<Outcome> {
    let start = graph.start_nodes().into_iter().next().ok_or_else(|| PipelineError::Structural { message: "graph has no start node".into() })?;

    let context = PipelineContext::in_memory(run_id.clone());
    let state = LoopState { current_node_id: start.id.clone(), ..LoopState::default() };
    let checkpoints = CheckpointManager::new(&config.logs_root);

    config.events.emit(PipelineEvent::new(
        PipelineEventKind::PipelineStarted,
        run_id,
        event_data(vec![("start_node", start.id.clone().into())]),
    ));

    execute_loop(graph, config, &run_dir, &context, state, &checkpoints).await
}

/// Resume a pipeline from a previously saved checkpoint, picking up at the
/// node it recorded as `next_node`.
pub async fn resume_loop(graph: &Graph, config: &EngineConfig, run_dir: RunDirectory, checkpoint: Checkpoint) -> PipelineResult<Outcome> {
    let context = PipelineContext::in_memory(checkpoint.run_id.clone());
    context.restore(checkpoint.context.clone()).await;

    let next_node_id = checkpoint.next_node.clone().ok_or_else(|| PipelineError::Checkpoint {
        message: "checkpoint has no recorded next node to resume from".into(),
    })?;

    let mut node_outcomes = IndexMap::new();
    for (node_id, status) in &checkpoint.node_statuses {
        node_outcomes.insert(node_id.clone(), Outcome::new(parse_outcome_status(status)?));
    }

    let state = LoopState {
        current_node_id: next_node_id,
        stage_index: checkpoint.visited.len(),
        completed_nodes: checkpoint.visited.clone(),
        node_retries: checkpoint.node_retries.clone(),
        node_outcomes,
    };
    let checkpoints = CheckpointManager::new(&config.logs_root);

    config.events.emit(PipelineEvent::new(
        PipelineEventKind::PipelineStarted,
        checkpoint.run_id.clone(),
        event_data(vec![("resumed_from", checkpoint.current_node.clone().into())]),
    ));

    execute_loop(graph, config, &run_dir, &context, state, &checkpoints).await
}

fn parse_outcome_status(s: &str) -> PipelineResult<OutcomeStatus> {
    Ok(match s {
        "success" => OutcomeStatus::Success,
        "partial_success" => OutcomeStatus::PartialSuccess,
        "retry" => OutcomeStatus::Retry,
        "fail" => OutcomeStatus::Fail,
        "skipped" => OutcomeStatus::Skipped,
        other => return Err(PipelineError::Checkpoint { message: format!("unknown outcome status in checkpoint: {other}") }),
    })
}

async fn execute_loop(
    graph: &Graph,
    config: &EngineConfig,
    run_dir: &RunDirectory,
    context: &PipelineContext,
    mut state: LoopState,
    checkpoints: &CheckpointManager,
) -> PipelineResult<Outcome> {
    loop {
        let node = graph.node_result(&state.current_node_id)?;

        if node.handler_type == HandlerType::Exit {
            let gate = check_goal_gates(graph, &state.node_outcomes);
            if !gate.satisfied {
                if let Some(target) = resolve_gate_retry(graph, &gate) {
                    state.current_node_id = target;
                    state.stage_index += 1;
                    continue;
                }
                let failed_node_id = gate.failed_node_id.unwrap_or_default();
                config.events.emit(PipelineEvent::new(
                    PipelineEventKind::PipelineFailed,
                    context.run_id.clone(),
                    event_data(vec![("reason", "goal_gate_unsatisfied".into()), ("node_id", failed_node_id.clone().into())]),
                ));
                return Err(PipelineError::GoalGateUnsatisfied {
                    node: failed_node_id.clone(),
                    message: format!("goal gate unsatisfied for node '{failed_node_id}'"),
                });
            }

            let outcome = execute_node(config, node, context, graph, run_dir.root()).await?;
            record_and_checkpoint(run_dir, checkpoints, context, &mut state, node, &outcome, None).await?;
            config.events.emit(PipelineEvent::new(
                PipelineEventKind::PipelineCompleted,
                context.run_id.clone(),
                event_data(vec![("final_node", node.id.clone().into())]),
            ));
            return Ok(outcome);
        }

        config.events.emit(PipelineEvent::new(
            PipelineEventKind::StageStarted,
            context.run_id.clone(),
            event_data(vec![("node_id", node.id.clone().into()), ("stage_index", (state.stage_index as u64).into())]),
        ));

        let outcome = execute_node(config, node, context, graph, run_dir.root()).await?;

        for (key, value) in &outcome.context_updates {
            context.set(key, value.clone()).await;
        }
        context.set("outcome", outcome.status.as_str()).await;
        if let Some(label) = &outcome.preferred_label {
            context.set("preferred_label", label.clone()).await;
        }

        let next_node_id = if outcome.status == OutcomeStatus::Fail {
            route_failure(node, graph, &outcome, context).await
        } else {
            advance(node, &outcome, context, graph).await
        };

        record_and_checkpoint(run_dir, checkpoints, context, &mut state, node, &outcome, next_node_id.clone()).await?;

        let node_id = node.id.clone();
        if outcome.status == OutcomeStatus::Fail {
            config.events.emit(PipelineEvent::new(PipelineEventKind::StageFailed, context.run_id.clone(), event_data(vec![("node_id", node_id.clone().into())])));
        } else {
            config.events.emit(PipelineEvent::new(PipelineEventKind::StageCompleted, context.run_id.clone(), event_data(vec![("node_id", node_id.clone().into())])));
        }

        match next_node_id {
            Some(next) => {
                state.current_node_id = next;
                state.stage_index += 1;
            }
            None => {
                let kind = if outcome.status == OutcomeStatus::Fail { PipelineEventKind::PipelineFailed } else { PipelineEventKind::PipelineCompleted };
                config.events.emit(PipelineEvent::new(kind, context.run_id.clone(), event_data(vec![("node_id", node_id.into())])));
                return Ok(outcome);
            }
        }
    }
}

fn resolve_gate_retry(graph: &Graph, gate: &GoalGateResult) -> Option<String> {
    let failed_id = gate.failed_node_id.as_ref()?;
    let node = graph.node(failed_id)?;
    get_retry_target(node, graph)
}

/// Route a failed outcome: a pipeline-authored forced-fail edge wins
/// first, then the node/graph retry-target chain, and ordinary edge
/// selection only as a last resort (picking up an unconditional edge
/// authored as the "fail path" with no `condition` attribute at all).
async fn route_failure(node: &Node, graph: &Graph, outcome: &Outcome, context: &PipelineContext) -> Option<String> {
    if let Some(edge) = find_fail_edge(&node.id, graph, outcome, context).await {
        return Some(edge.to.clone());
    }
    if let Some(target) = get_retry_target(node, graph) {
        return Some(target);
    }
    select_edge(graph, &node.id, outcome, context).await
}

/// Advance past a non-failing outcome. A parallel node's branches rejoin
/// at a convergence node that may be several hops away, which ordinary
/// edge selection (restricted to the node's own direct outgoing edges)
/// cannot reach — the handler names it directly via `suggested_next_ids`
/// instead, and a parallel node with no convergence target is terminal.
async fn advance(node: &Node, outcome: &Outcome, context: &PipelineContext, graph: &Graph) -> Option<String> {
    if node.handler_type == HandlerType::Parallel {
        return outcome.suggested_next_ids.first().cloned().filter(|id| graph.node(id).is_some());
    }
    select_edge(graph, &node.id, outcome, context).await
}

/// Invoke a node's handler under its retry policy. A handler that returns
/// `Outcome::retry()` is treated the same as a thrown transient error —
/// each attempt still counts against `max_attempts`, with backoff between
/// them — but exhausting the budget falls through to a `fail` outcome
/// rather than a hard pipeline error, so the caller's usual retry-target/
/// goal-gate routing still applies.
async fn execute_node(config: &EngineConfig, node: &Node, context: &PipelineContext, graph: &Graph, logs_root: &Path) -> PipelineResult<Outcome> {
    let handler = config
        .registry
        .get(node.handler_type)
        .ok_or_else(|| PipelineError::Structural { message: format!("no handler registered for node '{}' (type {:?})", node.id, node.handler_type) })?;

    let policy = policy_for_node(node, graph);
    let allow_partial = node.get("allow_partial").and_then(AttrValue::as_bool).unwrap_or(false);
    let partial_on_panic = allow_partial.then(Outcome::partial_success);
    let node_owned = node.clone();
    let context_owned = context.clone();
    let graph_owned = graph.clone();
    let logs_root_owned = logs_root.to_path_buf();

    let result = execute_with_retry(&policy, &node.id, partial_on_panic, move |_attempt| {
        let handler = Arc::clone(&handler);
        let node_owned = node_owned.clone();
        let context_owned = context_owned.clone();
        let graph_owned = graph_owned.clone();
        let logs_root_owned = logs_root_owned.clone();
        async move {
            let outcome = handler.execute(&node_owned, &context_owned, &graph_owned, &logs_root_owned).await?;
            if outcome.status == OutcomeStatus::Retry {
                let message = outcome.notes.clone().unwrap_or_else(|| "handler requested retry".to_string());
                Err(PipelineError::Transient { node: node_owned.id.clone(), message })
            } else {
                Ok(outcome)
            }
        }
    })
    .await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(PipelineError::Transient { message, .. }) => Outcome::fail(message),
        Err(other) => return Err(other),
    };

    Ok(apply_auto_status(node, outcome))
}

/// `auto_status`: if the node asks for it and its handler came back with no
/// explicit status of its own (`Skipped`, i.e. nothing that would otherwise
/// be inferred as `SUCCESS`), treat the visit as a success.
fn apply_auto_status(node: &Node, outcome: Outcome) -> Outcome {
    let auto_status = node.get("auto_status").and_then(AttrValue::as_bool).unwrap_or(false);
    if auto_status && outcome.status == OutcomeStatus::Skipped {
        Outcome::success()
    } else {
        outcome
    }
}

async fn record_and_checkpoint(
    run_dir: &RunDirectory,
    checkpoints: &CheckpointManager,
    context: &PipelineContext,
    state: &mut LoopState,
    node: &Node,
    outcome: &Outcome,
    next_node_id: Option<String>,
) -> PipelineResult<()> {
    run_dir.write_status(&node.id, outcome)?;

    if !state.completed_nodes.contains(&node.id) {
        state.completed_nodes.push(node.id.clone());
    }
    state.node_outcomes.insert(node.id.clone(), outcome.clone());
    state.node_retries.entry(node.id.clone()).and_modify(|n| *n += 1).or_insert(1);

    let node_statuses: HashMap<String, String> = state.node_outcomes.iter().map(|(id, o)| (id.clone(), o.status.as_str().to_string())).collect();

    let mut checkpoint = Checkpoint::new(context.run_id.clone(), node.id.clone(), context.snapshot().await, state.completed_nodes.clone())
        .with_node_statuses(node_statuses)
        .with_node_retries(state.node_retries.clone());
    if let Some(next) = next_node_id {
        checkpoint = checkpoint.with_next_node(next);
    }
    checkpoints.save(&checkpoint).await
}
