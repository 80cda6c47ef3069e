//! Replaces `$goal` placeholders in node `prompt` attributes with the
//! graph-level `goal` attribute value.

use crate::error::PipelineResult;
use crate::graph::{AttrValue, Graph};
use crate::transform::Transform;

pub struct VariableExpansionTransform;

impl Transform for VariableExpansionTransform {
    fn name(&self) -> &'static str {
        "variable_expansion"
    }

    fn apply(&self, graph: &mut Graph) -> PipelineResult<()> {
        let goal = graph.attrs.get("goal").map(AttrValue::as_str).unwrap_or_default();

        for node in graph.nodes.values_mut() {
            if let Some(AttrValue::String(prompt)) = node.attrs.get_mut("prompt") {
                if prompt.contains("$goal") {
                    *prompt = prompt.replace("$goal", &goal);
                }
            }
        }

        Ok(())
    }
}
