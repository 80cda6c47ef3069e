//! Applies the `model_stylesheet` graph attribute to pipeline nodes as a
//! pre-execution transform. Runs after `$goal` expansion but before
//! validation, so stylesheet-applied attributes are visible to lint rules.

use crate::error::PipelineResult;
use crate::graph::Graph;
use crate::stylesheet::parse_and_apply_stylesheet;
use crate::transform::Transform;

pub struct StylesheetTransform;

impl Transform for StylesheetTransform {
    fn name(&self) -> &'static str {
        "stylesheet"
    }

    fn apply(&self, graph: &mut Graph) -> PipelineResult<()> {
        parse_and_apply_stylesheet(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AttrMap, AttrValue, Node};
    use crate::types::HandlerType;

    #[test]
    fn applies_stylesheet_rules_to_nodes() {
        let mut attrs = AttrMap::new();
        let mut g = Graph::new();
        g.attrs.insert("model_stylesheet".into(), AttrValue::String("* { model: claude-sonnet-4-5; }".into()));
        attrs.insert("id_marker".into(), AttrValue::Bool(true));
        g.add_node(Node { id: "a".into(), handler_type: HandlerType::Codergen, attrs });

        StylesheetTransform.apply(&mut g).unwrap();
        assert_eq!(g.node("a").unwrap().get_str("llm_model").unwrap(), "claude-sonnet-4-5");
    }
}
