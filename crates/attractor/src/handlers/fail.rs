//! Fail handler: lets a pipeline declare a failure path directly in the
//! graph rather than relying on a handler raising an error.

use std::path::Path;

use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::graph::{Graph, Node};
use crate::handler::{Handler, Outcome};
use crate::types::HandlerType;

#[derive(Debug, Clone, Copy, Default)]
pub struct FailHandler;

#[async_trait]
impl Handler for FailHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::Fail
    }

    async fn execute(&self, node: &Node, _context: &PipelineContext, _graph: &Graph, _logs_root: &Path) -> PipelineResult<Outcome> {
        let reason = node.get_str("message").unwrap_or_else(|| format!("pipeline failed at explicit fail node '{}'", node.id));
        Ok(Outcome::fail(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AttrMap;

    #[tokio::test]
    async fn always_fails() {
        let node = Node { id: "dead_end".into(), handler_type: HandlerType::Fail, attrs: AttrMap::new() };
        let ctx = PipelineContext::in_memory("r");
        let graph = Graph::new();
        let outcome = FailHandler.execute(&node, &ctx, &graph, Path::new(".")).await.unwrap();
        assert_eq!(outcome.status, crate::types::OutcomeStatus::Fail);
        assert!(outcome.failure_reason.unwrap().contains("dead_end"));
    }

    #[tokio::test]
    async fn uses_message_attribute_when_present() {
        let mut attrs = AttrMap::new();
        attrs.insert("message".into(), crate::graph::AttrValue::String("budget exhausted".into()));
        let node = Node { id: "dead_end".into(), handler_type: HandlerType::Fail, attrs };
        let ctx = PipelineContext::in_memory("r");
        let graph = Graph::new();
        let outcome = FailHandler.execute(&node, &ctx, &graph, Path::new(".")).await.unwrap();
        assert_eq!(outcome.failure_reason.as_deref(), Some("budget exhausted"));
    }
}
