//! Model stylesheet application: sets default LLM configuration
//! (`llm_model`, `llm_provider`, `reasoning_effort`) on nodes from a
//! parsed stylesheet.
//!
//! # Resolution order
//!
//! 1. Explicit node attribute (highest precedence, never overwritten)
//! 2. Stylesheet rule by specificity (`*` < `.class` == `#id`, later rule
//!    wins at equal specificity)
//! 3. Graph-level default attribute
//!
//! Unknown properties pass through to the node attribute of the same name.

use crate::error::PipelineResult;
use crate::graph::{AttrValue, Graph, Node};
use crate::stylesheet_parser::{parse_stylesheet, property_to_attr, ParsedStylesheet, Selector, ALLOWED_PROPERTIES};

/// Apply a parsed stylesheet to a graph, setting node attributes per the
/// resolution order above.
pub fn apply_stylesheet(graph: &mut Graph, stylesheet: &ParsedStylesheet) -> PipelineResult<()> {
    let node_ids: Vec<String> = graph.nodes.keys().cloned().collect();
    let properties: Vec<&str> = stylesheet
        .rules
        .iter()
        .flat_map(|r| r.declarations.iter().map(|d| d.property.as_str()))
        .chain(ALLOWED_PROPERTIES.iter().copied())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    for node_id in &node_ids {
        for &property in &properties {
            let attr = property_to_attr(property);
            if graph.nodes.get(node_id).is_some_and(|n| n.get_str(attr).is_some()) {
                continue;
            }
            if let Some(value) = resolve_property(graph, node_id, stylesheet, property) {
                if let Some(node) = graph.nodes.get_mut(node_id) {
                    node.attrs.insert(attr.to_string(), AttrValue::from(value));
                }
            }
        }
    }

    Ok(())
}

fn resolve_property(graph: &Graph, node_id: &str, stylesheet: &ParsedStylesheet, property: &str) -> Option<String> {
    let node = graph.nodes.get(node_id)?;

    let mut best_value: Option<String> = None;
    let mut best_specificity: Option<u8> = None;

    for rule in &stylesheet.rules {
        if !selector_matches(&rule.selector, node) {
            continue;
        }
        for decl in &rule.declarations {
            if decl.property == property {
                let spec = rule.selector.specificity();
                if best_specificity.is_none_or(|bs| spec >= bs) {
                    best_value = Some(decl.value.clone());
                    best_specificity = Some(spec);
                }
            }
        }
    }

    if best_value.is_none() {
        let attr = property_to_attr(property);
        if let Some(graph_val) = graph.attrs.get(attr).map(AttrValue::as_str) {
            return Some(graph_val);
        }
    }

    best_value
}

fn selector_matches(selector: &Selector, node: &Node) -> bool {
    match selector {
        Selector::Universal => true,
        Selector::Id(id) => node.id == *id,
        Selector::Class(class_name) => node_has_class(node, class_name),
    }
}

fn node_has_class(node: &Node, class_name: &str) -> bool {
    node.get_str("class").is_some_and(|classes| classes.split(',').any(|c| c.trim() == class_name))
}

/// Read the `model_stylesheet` graph attribute, parse it, and apply it to
/// every node. An absent or empty stylesheet still triggers the
/// graph-level-default fallback in [`resolve_property`].
pub fn parse_and_apply_stylesheet(graph: &mut Graph) -> PipelineResult<()> {
    let stylesheet_str = match graph.attrs.get("model_stylesheet") {
        Some(v) => v.as_str(),
        None => String::new(),
    };

    let parsed = if stylesheet_str.is_empty() { ParsedStylesheet::default() } else { parse_stylesheet(&stylesheet_str)? };

    apply_stylesheet(graph, &parsed)
}
