//! Conditional (diamond) handler: performs no work itself, exists only so
//! diamond nodes resolve to a handler. Routing is driven entirely by
//! outgoing-edge conditions in [`crate::edge_selection`].

use std::path::Path;

use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::graph::{Graph, Node};
use crate::handler::{Handler, Outcome};
use crate::types::HandlerType;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionalHandler;

#[async_trait]
impl Handler for ConditionalHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::Conditional
    }

    async fn execute(&self, node: &Node, _context: &PipelineContext, _graph: &Graph, _logs_root: &Path) -> PipelineResult<Outcome> {
        Ok(Outcome::success().with_notes(format!("conditional node '{}': routing handled by edge selection", node.id)))
    }
}
