//! Fan-in handler: consolidates a preceding parallel node's branch
//! results and selects the best candidate by heuristic ranking.

use std::path::Path;

use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::graph::{Graph, Node};
use crate::handler::{Handler, Outcome};
use crate::types::{HandlerType, OutcomeStatus};

#[derive(Debug, Clone, Copy, Default)]
pub struct FanInHandler;

fn status_rank(status: &str) -> u32 {
    match status {
        "success" => 0,
        "partial_success" => 1,
        "retry" => 2,
        "fail" => 3,
        "skipped" => 4,
        _ => 5,
    }
}

#[async_trait]
impl Handler for FanInHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::FanIn
    }

    async fn execute(&self, _node: &Node, context: &PipelineContext, _graph: &Graph, _logs_root: &Path) -> PipelineResult<Outcome> {
        let results = context.get("parallel.results").await;
        let candidates = results.as_ref().and_then(serde_json::Value::as_array);

        let Some(candidates) = candidates else {
            return Ok(Outcome::fail("no parallel results to evaluate"));
        };
        if candidates.is_empty() {
            return Ok(Outcome::fail("no parallel results to evaluate"));
        }

        // Sort by (outcome_rank, -score, id): lower rank is better, higher
        // score is better, lexically smaller target breaks remaining ties.
        let best = candidates.iter().min_by(|a, b| {
            let rank_a = status_rank(a.get("outcome").and_then(serde_json::Value::as_str).unwrap_or("fail"));
            let rank_b = status_rank(b.get("outcome").and_then(serde_json::Value::as_str).unwrap_or("fail"));
            let score_a = a.get("score").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
            let score_b = b.get("score").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
            let id_a = a.get("target").and_then(serde_json::Value::as_str).unwrap_or("");
            let id_b = b.get("target").and_then(serde_json::Value::as_str).unwrap_or("");
            rank_a.cmp(&rank_b).then_with(|| score_b.total_cmp(&score_a)).then_with(|| id_a.cmp(id_b))
        });

        let Some(best) = best else {
            return Ok(Outcome::fail("no candidates found"));
        };

        let all_failed = candidates.iter().all(|c| c.get("outcome").and_then(serde_json::Value::as_str).unwrap_or("fail") == "fail");
        if all_failed {
            return Ok(Outcome::fail("all parallel candidates failed"));
        }

        let best_target = best.get("target").and_then(serde_json::Value::as_str).unwrap_or("unknown").to_string();
        let best_status = best.get("outcome").and_then(serde_json::Value::as_str).unwrap_or("fail").to_string();

        let mut outcome = Outcome::success()
            .with_notes(format!("selected best candidate: {best_target}"))
            .with_context_update("parallel.fan_in.best_id", best_target.clone())
            .with_context_update("parallel.fan_in.best_outcome", best_status.clone());

        if best_status != OutcomeStatus::Success.as_str() {
            outcome.status = OutcomeStatus::PartialSuccess;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AttrMap;
    use serde_json::json;

    fn node() -> Node {
        Node { id: "merge".into(), handler_type: HandlerType::FanIn, attrs: AttrMap::new() }
    }

    #[tokio::test]
    async fn picks_the_best_ranked_candidate() {
        let ctx = PipelineContext::in_memory("r");
        ctx.set(
            "parallel.results",
            json!([
                {"target": "a", "outcome": "fail", "score": 0.0},
                {"target": "b", "outcome": "success", "score": 1.0},
            ]),
        )
        .await;
        let graph = Graph::new();
        let outcome = FanInHandler.execute(&node(), &ctx, &graph, Path::new("/tmp")).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.context_updates.get("parallel.fan_in.best_id").unwrap(), "b");
    }

    #[tokio::test]
    async fn all_failed_candidates_is_a_failure() {
        let ctx = PipelineContext::in_memory("r");
        ctx.set("parallel.results", json!([{"target": "a", "outcome": "fail", "score": 0.0}])).await;
        let graph = Graph::new();
        let outcome = FanInHandler.execute(&node(), &ctx, &graph, Path::new("/tmp")).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Fail);
    }

    #[tokio::test]
    async fn missing_results_is_a_failure() {
        let ctx = PipelineContext::in_memory("r");
        let graph = Graph::new();
        let outcome = FanInHandler.execute(&node(), &ctx, &graph, Path::new("/tmp")).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Fail);
    }

    #[tokio::test]
    async fn best_non_success_candidate_yields_partial_success() {
        let ctx = PipelineContext::in_memory("r");
        ctx.set("parallel.results", json!([{"target": "a", "outcome": "partial_success", "score": 0.5}])).await;
        let graph = Graph::new();
        let outcome = FanInHandler.execute(&node(), &ctx, &graph, Path::new("/tmp")).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::PartialSuccess);
    }
}
