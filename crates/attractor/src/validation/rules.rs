//! Built-in lint rules covering structural integrity and best-practice
//! warnings.

use std::collections::HashSet;

use super::{Diagnostic, LintRule, Severity};
use crate::graph::{AttrValue, Graph};
use crate::types::HandlerType;

/// Return all built-in lint rules.
#[must_use]
pub fn builtin_rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(StartNodeRule),
        Box::new(TerminalNodeRule),
        Box::new(ReachabilityRule),
        Box::new(EdgeTargetExistsRule),
        Box::new(StartNoIncomingRule),
        Box::new(ExitNoOutgoingRule),
        Box::new(FidelityValidRule),
        Box::new(RetryTargetExistsRule),
        Box::new(GoalGateHasRetryRule),
        Box::new(PromptOnLlmNodesRule),
    ]
}

fn find_start_nodes(graph: &Graph) -> Vec<&str> {
    graph.nodes.values().filter(|n| n.handler_type == HandlerType::Start).map(|n| n.id.as_str()).collect()
}

fn find_exit_nodes(graph: &Graph) -> Vec<&str> {
    graph.nodes.values().filter(|n| n.handler_type == HandlerType::Exit).map(|n| n.id.as_str()).collect()
}

struct StartNodeRule;
impl LintRule for StartNodeRule {
    fn name(&self) -> &'static str {
        "start_node"
    }

    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let starts = find_start_nodes(graph);
        match starts.len() {
            0 => vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: "pipeline has no start node (shape=Mdiamond)".into(),
                node_id: None,
                edge: None,
            }],
            1 => vec![],
            _ => vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("pipeline has {} start nodes (expected exactly 1): {}", starts.len(), starts.join(", ")),
                node_id: None,
                edge: None,
            }],
        }
    }
}

struct TerminalNodeRule;
impl LintRule for TerminalNodeRule {
    fn name(&self) -> &'static str {
        "terminal_node"
    }

    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let exits = find_exit_nodes(graph);
        match exits.len() {
            0 => vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: "pipeline has no exit node (shape=Msquare)".into(),
                node_id: None,
                edge: None,
            }],
            1 => vec![],
            _ => vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("pipeline has {} exit nodes (expected exactly 1): {}", exits.len(), exits.join(", ")),
                node_id: None,
                edge: None,
            }],
        }
    }
}

struct ReachabilityRule;
impl LintRule for ReachabilityRule {
    fn name(&self) -> &'static str {
        "reachability"
    }

    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let starts = find_start_nodes(graph);
        if starts.is_empty() {
            return vec![];
        }
        let mut reachable = HashSet::new();
        let mut stack: Vec<&str> = starts;
        while let Some(node_id) = stack.pop() {
            if !reachable.insert(node_id) {
                continue;
            }
            for edge in graph.outgoing(node_id) {
                if !reachable.contains(edge.to.as_str()) {
                    stack.push(&edge.to);
                }
            }
        }
        graph
            .nodes
            .keys()
            .filter(|id| !reachable.contains(id.as_str()))
            .map(|id| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("node `{id}` is unreachable from the start node"),
                node_id: Some(id.clone()),
                edge: None,
            })
            .collect()
    }
}

struct EdgeTargetExistsRule;
impl LintRule for EdgeTargetExistsRule {
    fn name(&self) -> &'static str {
        "edge_target_exists"
    }

    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for edge in &graph.edges {
            if !graph.nodes.contains_key(&edge.from) {
                diagnostics.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!("edge source `{}` does not exist", edge.from),
                    node_id: None,
                    edge: Some((edge.from.clone(), edge.to.clone())),
                });
            }
            if !graph.nodes.contains_key(&edge.to) {
                diagnostics.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!("edge target `{}` does not exist", edge.to),
                    node_id: None,
                    edge: Some((edge.from.clone(), edge.to.clone())),
                });
            }
        }
        diagnostics
    }
}

struct StartNoIncomingRule;
impl LintRule for StartNoIncomingRule {
    fn name(&self) -> &'static str {
        "start_no_incoming"
    }

    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        find_start_nodes(graph)
            .into_iter()
            .filter(|id| !graph.incoming(id).is_empty())
            .map(|id| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("start node `{id}` has incoming edges"),
                node_id: Some(id.to_string()),
                edge: None,
            })
            .collect()
    }
}

struct ExitNoOutgoingRule;
impl LintRule for ExitNoOutgoingRule {
    fn name(&self) -> &'static str {
        "exit_no_outgoing"
    }

    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        find_exit_nodes(graph)
            .into_iter()
            .filter(|id| !graph.outgoing(id).is_empty())
            .map(|id| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("exit node `{id}` has outgoing edges"),
                node_id: Some(id.to_string()),
                edge: None,
            })
            .collect()
    }
}

struct FidelityValidRule;
impl LintRule for FidelityValidRule {
    fn name(&self) -> &'static str {
        "fidelity_valid"
    }

    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for node in graph.nodes.values() {
            if let Some(fidelity_str) = node.get_str("fidelity") {
                if fidelity_str.parse::<crate::types::FidelityMode>().is_err() {
                    diagnostics.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Warning,
                        message: format!("node `{}` has invalid fidelity mode `{fidelity_str}`", node.id),
                        node_id: Some(node.id.clone()),
                        edge: None,
                    });
                }
            }
        }
        if let Some(fidelity_str) = graph.attrs.get("default_fidelity").map(AttrValue::as_str) {
            if fidelity_str.parse::<crate::types::FidelityMode>().is_err() {
                diagnostics.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Warning,
                    message: format!("graph-level default_fidelity mode `{fidelity_str}` is invalid"),
                    node_id: None,
                    edge: None,
                });
            }
        }
        diagnostics
    }
}

const RETRY_TARGET_ATTRS: &[&str] = &["retry_target", "fallback_retry_target"];

fn has_any_retry_target(node: &crate::graph::Node, graph: &Graph) -> bool {
    RETRY_TARGET_ATTRS.iter().any(|attr| node.get_str(attr).is_some())
        || RETRY_TARGET_ATTRS.iter().any(|attr| graph.attrs.get(*attr).is_some())
}

struct RetryTargetExistsRule;
impl LintRule for RetryTargetExistsRule {
    fn name(&self) -> &'static str {
        "retry_target_exists"
    }

    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for node in graph.nodes.values() {
            for &attr_name in RETRY_TARGET_ATTRS {
                if let Some(target) = node.get_str(attr_name) {
                    if !graph.nodes.contains_key(&target) {
                        diagnostics.push(Diagnostic {
                            rule: self.name().into(),
                            severity: Severity::Warning,
                            message: format!("node `{}` has {attr_name}=`{target}` but node `{target}` does not exist", node.id),
                            node_id: Some(node.id.clone()),
                            edge: None,
                        });
                    }
                }
            }
        }
        for &attr_name in RETRY_TARGET_ATTRS {
            if let Some(target) = graph.attrs.get(attr_name).map(AttrValue::as_str) {
                if !graph.nodes.contains_key(&target) {
                    diagnostics.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Warning,
                        message: format!("graph has {attr_name}=`{target}` but node `{target}` does not exist"),
                        node_id: None,
                        edge: None,
                    });
                }
            }
        }
        diagnostics
    }
}

struct GoalGateHasRetryRule;
impl LintRule for GoalGateHasRetryRule {
    fn name(&self) -> &'static str {
        "goal_gate_has_retry"
    }

    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        graph
            .nodes
            .values()
            .filter(|n| n.get("goal_gate").and_then(AttrValue::as_bool).unwrap_or(false))
            .filter(|n| !has_any_retry_target(n, graph))
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!(
                    "node `{}` has goal_gate=true but no retry_target is defined (goal gate failures will terminate the pipeline)",
                    n.id
                ),
                node_id: Some(n.id.clone()),
                edge: None,
            })
            .collect()
    }
}

const LLM_HANDLER_TYPES: &[HandlerType] = &[HandlerType::Codergen];

struct PromptOnLlmNodesRule;
impl LintRule for PromptOnLlmNodesRule {
    fn name(&self) -> &'static str {
        "prompt_on_llm_nodes"
    }

    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        graph
            .nodes
            .values()
            .filter(|n| LLM_HANDLER_TYPES.contains(&n.handler_type))
            .filter(|n| n.get_str("prompt").is_none() && n.get_str("label").is_none())
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!("codergen node `{}` has no prompt or label attribute", n.id),
                node_id: Some(n.id.clone()),
                edge: None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AttrMap, Edge, Node};

    fn node(id: &str, handler_type: HandlerType, attrs: AttrMap) -> Node {
        Node { id: id.into(), handler_type, attrs }
    }

    #[test]
    fn flags_missing_start_node() {
        let mut g = Graph::new();
        g.add_node(node("exit", HandlerType::Exit, AttrMap::new()));
        let diagnostics = StartNodeRule.apply(&g);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Error);
    }

    #[test]
    fn flags_unreachable_node() {
        let mut g = Graph::new();
        g.add_node(node("start", HandlerType::Start, AttrMap::new()));
        g.add_node(node("exit", HandlerType::Exit, AttrMap::new()));
        g.add_node(node("orphan", HandlerType::Codergen, AttrMap::new()));
        g.add_edge(Edge { from: "start".into(), to: "exit".into(), label: None, attrs: AttrMap::new() });
        let diagnostics = ReachabilityRule.apply(&g);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].node_id.as_deref(), Some("orphan"));
    }

    #[test]
    fn goal_gate_without_retry_target_warns() {
        let mut attrs = AttrMap::new();
        attrs.insert("goal_gate".into(), AttrValue::Bool(true));
        let mut g = Graph::new();
        g.add_node(node("gate", HandlerType::Codergen, attrs));
        let diagnostics = GoalGateHasRetryRule.apply(&g);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn codergen_node_without_prompt_or_label_warns() {
        let mut g = Graph::new();
        g.add_node(node("gen", HandlerType::Codergen, AttrMap::new()));
        let diagnostics = PromptOnLlmNodesRule.apply(&g);
        assert_eq!(diagnostics.len(), 1);
    }
}
