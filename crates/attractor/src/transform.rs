//! Transform trait and registry.
//!
//! Transforms preprocess the pipeline graph before execution begins.
//! Built-in transforms handle `$goal` expansion and stylesheet
//! application; custom transforms can be registered for domain-specific
//! preprocessing and always run after the built-ins.

use crate::error::PipelineResult;
use crate::graph::Graph;

/// A graph transform applied before pipeline execution.
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    /// Apply the transform to the graph, modifying it in-place.
    fn apply(&self, graph: &mut Graph) -> PipelineResult<()>;
}

/// An ordered collection of transforms to apply before execution:
/// built-ins first, then custom transforms, each group in registration
/// order.
pub struct TransformRegistry {
    builtin: Vec<Box<dyn Transform>>,
    custom: Vec<Box<dyn Transform>>,
}

impl TransformRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { builtin: Vec::new(), custom: Vec::new() }
    }

    /// A registry pre-loaded with the default built-in transforms:
    /// `$goal` expansion, then stylesheet application.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_builtin(crate::transforms::VariableExpansionTransform);
        registry.register_builtin(crate::transforms::StylesheetTransform);
        registry
    }

    pub fn register_builtin(&mut self, transform: impl Transform + 'static) {
        self.builtin.push(Box::new(transform));
    }

    pub fn register_custom(&mut self, transform: impl Transform + 'static) {
        self.custom.push(Box::new(transform));
    }

    /// Apply all transforms to the graph: built-ins first, then custom.
    /// Stops on the first error.
    pub fn apply_all(&self, graph: &mut Graph) -> PipelineResult<()> {
        for transform in &self.builtin {
            transform.apply(graph)?;
        }
        for transform in &self.custom {
            transform.apply(graph)?;
        }
        Ok(())
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}
