//! Start handler: unconditional success, no work performed.

use std::path::Path;

use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::graph::{Graph, Node};
use crate::handler::{Handler, Outcome};
use crate::types::HandlerType;

#[derive(Debug, Clone, Copy, Default)]
pub struct StartHandler;

#[async_trait]
impl Handler for StartHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::Start
    }

    async fn execute(&self, _node: &Node, _context: &PipelineContext, _graph: &Graph, _logs_root: &Path) -> PipelineResult<Outcome> {
        Ok(Outcome::success())
    }
}
