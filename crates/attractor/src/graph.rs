//! The in-memory graph model: nodes, edges, and the loosely-typed
//! attribute bag every DOT `key=value` pair lands in.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::types::HandlerType;

/// A DOT attribute value, kept loosely typed since the source format never
/// declares a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl AttrValue {
    #[must_use]
    pub fn as_str(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Self::String(s) => s.clone(),
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            Self::Number(n) => Some(*n != 0.0),
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(s) => s.parse().ok(),
            Self::Bool(_) => None,
        }
    }

    #[must_use]
    pub fn from_dot_literal(raw: &str) -> Self {
        if raw == "true" {
            Self::Bool(true)
        } else if raw == "false" {
            Self::Bool(false)
        } else if let Ok(n) = raw.parse::<f64>() {
            Self::Number(n)
        } else {
            Self::String(raw.to_string())
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

pub type AttrMap = IndexMap<String, AttrValue>;

/// Map a node's `shape` attribute to the handler that drives it.
pub fn shape_to_handler_type(shape: &str) -> PipelineResult<HandlerType> {
    Ok(match shape {
        "Mdiamond" => HandlerType::Start,
        "Msquare" => HandlerType::Exit,
        "diamond" => HandlerType::Conditional,
        "octagon" => HandlerType::Fail,
        "box" => HandlerType::Codergen,
        "house" => HandlerType::WaitHuman,
        "component" => HandlerType::Tool,
        "doublecircle" => HandlerType::Parallel,
        "invtriangle" => HandlerType::FanIn,
        "tab" => HandlerType::StackManager,
        other => {
            return Err(PipelineError::Structural {
                message: format!("unrecognized node shape: {other}"),
            })
        }
    })
}

/// One node in the pipeline graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub handler_type: HandlerType,
    pub attrs: AttrMap,
}

impl Node {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.attrs.get(key).map(AttrValue::as_str)
    }
}

/// One directed edge, labeled with the handler outcome that selects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub label: Option<String>,
    pub attrs: AttrMap,
}

impl Edge {
    #[must_use]
    pub fn condition(&self) -> Option<String> {
        self.attrs.get("condition").map(AttrValue::as_str)
    }

    /// Defaults to zero when unset, matching the data model's
    /// `weight (integer, default 0)`.
    #[must_use]
    pub fn weight(&self) -> i64 {
        self.attrs.get("weight").and_then(AttrValue::as_f64).map_or(0, |n| n as i64)
    }
}

/// The full pipeline definition: nodes keyed by id, plus the ordered
/// edge list (order matters for tie-breaking during edge selection).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: IndexMap<String, Node>,
    pub edges: Vec<Edge>,
    pub attrs: AttrMap,
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_result(&self, id: &str) -> PipelineResult<&Node> {
        self.node(id).ok_or_else(|| PipelineError::UnknownNode { id: id.into() })
    }

    #[must_use]
    pub fn outgoing(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == node_id).collect()
    }

    #[must_use]
    pub fn incoming(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.to == node_id).collect()
    }

    #[must_use]
    pub fn start_nodes(&self) -> Vec<&Node> {
        self.nodes.values().filter(|n| n.handler_type == HandlerType::Start).collect()
    }

    /// A node with more than one incoming edge is a fan-in (convergence)
    /// point, independent of its declared handler type.
    #[must_use]
    pub fn is_fan_in(&self, node_id: &str) -> bool {
        self.incoming(node_id).len() > 1
    }

    /// Breadth-first search from `from`, returning the first node reachable
    /// from every branch head in `branch_heads` — the structurally-common
    /// convergence point a parallel node's branches rejoin at.
    #[must_use]
    pub fn find_common_convergence(&self, branch_heads: &[String]) -> Option<String> {
        if branch_heads.is_empty() {
            return None;
        }
        let reachable_sets: Vec<std::collections::HashSet<String>> =
            branch_heads.iter().map(|head| self.reachable_from(head)).collect();

        let mut candidates = reachable_sets[0].clone();
        for set in &reachable_sets[1..] {
            candidates.retain(|id| set.contains(id));
        }

        // Prefer the candidate closest (by BFS distance) to the first branch head.
        let mut queue: std::collections::VecDeque<String> = std::collections::VecDeque::new();
        let mut visited = std::collections::HashSet::new();
        queue.push_back(branch_heads[0].clone());
        visited.insert(branch_heads[0].clone());
        while let Some(current) = queue.pop_front() {
            if candidates.contains(&current) {
                return Some(current);
            }
            for edge in self.outgoing(&current) {
                if visited.insert(edge.to.clone()) {
                    queue.push_back(edge.to.clone());
                }
            }
        }
        None
    }

    fn reachable_from(&self, start: &str) -> std::collections::HashSet<String> {
        let mut visited = std::collections::HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(start.to_string());
        visited.insert(start.to_string());
        while let Some(current) = queue.pop_front() {
            for edge in self.outgoing(&current) {
                if visited.insert(edge.to.clone()) {
                    queue.push_back(edge.to.clone());
                }
            }
        }
        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, handler_type: HandlerType) -> Node {
        Node { id: id.into(), handler_type, attrs: AttrMap::new() }
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge { from: from.into(), to: to.into(), label: None, attrs: AttrMap::new() }
    }

    #[test]
    fn shape_maps_to_handler_type() {
        assert_eq!(shape_to_handler_type("Mdiamond").unwrap(), HandlerType::Start);
        assert_eq!(shape_to_handler_type("doublecircle").unwrap(), HandlerType::Parallel);
        assert!(shape_to_handler_type("nonsense").is_err());
    }

    #[test]
    fn fan_in_detection_counts_incoming_edges() {
        let mut g = Graph::new();
        g.add_node(node("a", HandlerType::Codergen));
        g.add_node(node("b", HandlerType::Codergen));
        g.add_node(node("c", HandlerType::FanIn));
        g.add_edge(edge("a", "c"));
        g.add_edge(edge("b", "c"));
        assert!(g.is_fan_in("c"));
        assert!(!g.is_fan_in("a"));
    }

    #[test]
    fn finds_common_convergence_point() {
        let mut g = Graph::new();
        for id in ["p", "a", "b", "c"] {
            g.add_node(node(id, HandlerType::Codergen));
        }
        g.add_edge(edge("a", "c"));
        g.add_edge(edge("b", "c"));
        let convergence = g.find_common_convergence(&["a".into(), "b".into()]);
        assert_eq!(convergence, Some("c".into()));
    }

    #[test]
    fn attr_value_as_str_formats_integral_numbers_without_decimals() {
        assert_eq!(AttrValue::Number(3.0).as_str(), "3");
        assert_eq!(AttrValue::from_dot_literal("true").as_bool(), Some(true));
    }
}
