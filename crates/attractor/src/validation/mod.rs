//! Validation and linting for pipeline graphs.
//!
//! Provides a diagnostic model, a handful of built-in lint rules, and
//! public [`validate`] / [`validate_or_raise`] entry points. Custom lint
//! rules can be registered alongside the built-ins.

pub mod rules;

use crate::error::{PipelineError, PipelineResult};
use crate::graph::Graph;

/// The severity of a validation diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The pipeline will not execute correctly.
    Error,
    /// The pipeline may behave unexpectedly.
    Warning,
}

/// A single validation diagnostic produced by a lint rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub node_id: Option<String>,
    pub edge: Option<(String, String)>,
}

/// A lint rule that validates a pipeline graph.
pub trait LintRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic>;
}

/// Validate a pipeline graph against all built-in rules plus any extra rules.
#[must_use]
pub fn validate(graph: &Graph, extra_rules: &[&dyn LintRule]) -> Vec<Diagnostic> {
    let builtins = rules::builtin_rules();
    let mut diagnostics = Vec::new();
    for rule in &builtins {
        diagnostics.extend(rule.apply(graph));
    }
    for rule in extra_rules {
        diagnostics.extend(rule.apply(graph));
    }
    diagnostics
}

/// Validate a pipeline graph, failing fast with [`PipelineError::Structural`]
/// if any ERROR-level diagnostic is found.
pub fn validate_or_raise(graph: &Graph, extra_rules: &[&dyn LintRule]) -> PipelineResult<Vec<Diagnostic>> {
    let diagnostics = validate(graph, extra_rules);
    let errors: Vec<&Diagnostic> = diagnostics.iter().filter(|d| d.severity == Severity::Error).collect();

    if !errors.is_empty() {
        let messages: Vec<String> = errors
            .iter()
            .map(|d| {
                if let Some(ref node_id) = d.node_id {
                    format!("[{}] {} (node: {node_id})", d.rule, d.message)
                } else if let Some(ref edge) = d.edge {
                    format!("[{}] {} (edge: {} -> {})", d.rule, d.message, edge.0, edge.1)
                } else {
                    format!("[{}] {}", d.rule, d.message)
                }
            })
            .collect();
        return Err(PipelineError::Structural {
            message: format!("validation failed with {} error(s):\n  {}", errors.len(), messages.join("\n  ")),
        });
    }

    Ok(diagnostics)
}
