//! Exit handler: unconditional success, marks pipeline completion.

use std::path::Path;

use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::graph::{Graph, Node};
use crate::handler::{Handler, Outcome};
use crate::types::HandlerType;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExitHandler;

#[async_trait]
impl Handler for ExitHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::Exit
    }

    async fn execute(&self, _node: &Node, _context: &PipelineContext, _graph: &Graph, _logs_root: &Path) -> PipelineResult<Outcome> {
        Ok(Outcome::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AttrMap;

    #[tokio::test]
    async fn always_succeeds() {
        let node = Node { id: "exit".into(), handler_type: HandlerType::Exit, attrs: AttrMap::new() };
        let ctx = PipelineContext::in_memory("r");
        let graph = Graph::new();
        let outcome = ExitHandler.execute(&node, &ctx, &graph, Path::new(".")).await.unwrap();
        assert_eq!(outcome.status, crate::types::OutcomeStatus::Success);
    }
}
