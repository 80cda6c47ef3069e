//! Stack manager handler: a supervisor that polls a child pipeline's
//! status keys in context until it reports completion, a stop condition
//! fires, or a cycle budget runs out.

use std::path::Path;

use async_trait::async_trait;

use crate::condition::{evaluate, ConditionContext};
use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::graph::{Graph, Node};
use crate::handler::{Handler, Outcome};
use crate::types::{Duration, HandlerType};

const DEFAULT_POLL_INTERVAL_MS: u64 = 45_000;
const DEFAULT_MAX_CYCLES: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Actions {
    observe: bool,
    wait: bool,
}

impl Actions {
    fn from_attr(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self { observe: false, wait: false };
        };
        let mut actions = Self { observe: false, wait: false };
        for part in value.split(',').map(str::trim) {
            match part {
                "observe" => actions.observe = true,
                "wait" => actions.wait = true,
                _ => {}
            }
        }
        actions
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StackManagerHandler;

#[async_trait]
impl Handler for StackManagerHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::StackManager
    }

    async fn execute(&self, node: &Node, context: &PipelineContext, _graph: &Graph, _logs_root: &Path) -> PipelineResult<Outcome> {
        let poll_interval = node
            .get_str("manager.poll_interval")
            .and_then(|s| Duration::parse(&s).ok())
            .unwrap_or_else(|| Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
        let max_cycles = node.get("manager.max_cycles").and_then(crate::graph::AttrValue::as_f64).map(|n| n as u64).unwrap_or(DEFAULT_MAX_CYCLES).max(1);
        let stop_condition = node.get_str("manager.stop_condition").unwrap_or_default();
        let actions = Actions::from_attr(node.get_str("manager.actions").as_deref());

        for cycle in 1..=max_cycles {
            let snapshot = context.snapshot().await;

            if actions.observe {
                let status = snapshot.get("stack.child.status").map_or_else(|| "unknown".to_string(), |v| v.as_str().unwrap_or("unknown").to_string());
                tracing::info!(node = %node.id, cycle, status = %status, "observed child status");
            }

            let child_status = context.get("stack.child.status").await.and_then(|v| v.as_str().map(str::to_string));
            match child_status.as_deref() {
                Some("completed") => {
                    let child_outcome = context.get("stack.child.outcome").await.and_then(|v| v.as_str().map(str::to_string));
                    if child_outcome.as_deref() == Some("success") {
                        return Ok(Outcome::success().with_notes(format!("child pipeline completed after {cycle} cycle(s)")));
                    }
                    // Completed with a non-success outcome falls through to
                    // continue polling rather than terminating immediately.
                }
                Some("failed") => {
                    return Ok(Outcome::fail(format!("child pipeline failed after {cycle} cycle(s)")));
                }
                _ => {}
            }

            if !stop_condition.trim().is_empty() {
                let cond_ctx = ConditionContext { outcome_status: "success".to_string(), preferred_label: None, context: &snapshot };
                if evaluate(&stop_condition, &cond_ctx) {
                    return Ok(Outcome::success().with_notes(format!("stop condition satisfied after {cycle} cycle(s)")));
                }
            }

            if cycle < max_cycles && actions.wait {
                tokio::time::sleep(poll_interval.as_std()).await;
            }
        }

        Ok(Outcome::fail(format!("exceeded {max_cycles} poll cycles without the child pipeline terminating")))
    }
}
