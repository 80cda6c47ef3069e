//! Choosing which outgoing edge a handler's [`Outcome`] routes to.
//!
//! Selection runs in five steps, each only reached if the previous one
//! produced nothing:
//!
//! 1. **Condition dominance.** Edges with a non-empty `condition` attribute
//!    that evaluates true form the candidate set; if any exist they beat
//!    every non-matching edge outright. Ties break by highest `weight`,
//!    then by lexically smallest `to`.
//! 2. **Preferred label.** If the outcome names a non-empty
//!    `preferred_label`, the first outgoing edge whose normalized label
//!    matches it (after stripping a leading accelerator like `[K] `,
//!    `K) `, or `K - `) wins.
//! 3. **Suggested ids.** Otherwise, the first outgoing edge whose `to`
//!    appears in the outcome's `suggested_next_ids`, checked in that
//!    list's order.
//! 4. **Weight.** Among all remaining outgoing edges, the highest `weight`
//!    wins.
//! 5. **Lexical.** Ties at step 4 go to the lexically smallest `to`.
//!
//! Returns `None` only when the node has no outgoing edges at all.

use crate::condition::{evaluate, ConditionContext};
use crate::context::PipelineContext;
use crate::graph::{Edge, Graph};
use crate::handler::Outcome;

fn strip_accelerator(label: &str) -> &str {
    let bytes = label.as_bytes();
    if let Some(rest) = label.strip_prefix('[') {
        if let Some(close) = rest.find(']') {
            let after = &rest[close + 1..];
            if let Some(stripped) = after.strip_prefix(' ') {
                return stripped;
            }
        }
    }
    if bytes.len() >= 3 && bytes[1] == b')' && bytes[2] == b' ' {
        return &label[3..];
    }
    if bytes.len() >= 4 && bytes[1] == b' ' && bytes[2] == b'-' && bytes[3] == b' ' {
        return &label[4..];
    }
    label
}

fn normalize_label(label: &str) -> String {
    strip_accelerator(label.trim()).trim().to_ascii_lowercase()
}

fn weight_then_lexical<'a>(edges: &[&'a Edge]) -> Option<&'a Edge> {
    edges.iter().copied().max_by(|a, b| a.weight().cmp(&b.weight()).then_with(|| b.to.cmp(&a.to)))
}

/// Resolve an outcome to the next node id, per the five-step algorithm
/// described above. `None` means the node was structurally terminal.
pub async fn select_edge(graph: &Graph, node_id: &str, outcome: &Outcome, context: &PipelineContext) -> Option<String> {
    let outgoing = graph.outgoing(node_id);
    if outgoing.is_empty() {
        return None;
    }

    let snapshot = context.snapshot().await;
    let cond_ctx = ConditionContext {
        outcome_status: outcome.status.as_str().to_string(),
        preferred_label: outcome.preferred_label.clone(),
        context: &snapshot,
    };

    let matching: Vec<&Edge> = outgoing
        .iter()
        .copied()
        .filter(|e| {
            e.condition()
                .filter(|c| !c.trim().is_empty())
                .is_some_and(|c| evaluate(&c, &cond_ctx))
        })
        .collect();
    if !matching.is_empty() {
        return weight_then_lexical(&matching).map(|e| e.to.clone());
    }

    if let Some(label) = outcome.preferred_label.as_deref().filter(|l| !l.trim().is_empty()) {
        let wanted = normalize_label(label);
        if let Some(edge) = outgoing.iter().find(|e| e.label.as_deref().map(normalize_label).as_deref() == Some(wanted.as_str())) {
            return Some(edge.to.clone());
        }
    }

    for id in &outcome.suggested_next_ids {
        if let Some(edge) = outgoing.iter().find(|e| &e.to == id) {
            return Some(edge.to.clone());
        }
    }

    weight_then_lexical(&outgoing).map(|e| e.to.clone())
}
