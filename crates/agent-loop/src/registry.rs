//! The set of tools a session can invoke, keyed by name and order-preserving
//! so tool listings presented to the model stay stable.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{AgentError, AgentResult};
use crate::execution::ExecutionEnvironment;
use crate::llm::ToolDefinition;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// What a tool execution produced.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    Text(String),
    ImageWithText {
        text: String,
        data: Vec<u8>,
        media_type: String,
    },
}

impl ToolOutput {
    #[must_use]
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text(t) | Self::ImageWithText { text: t, .. } => t,
        }
    }
}

pub type ToolExecutorFn = Box<
    dyn Fn(Value, &dyn ExecutionEnvironment) -> Pin<Box<dyn Future<Output = AgentResult<ToolOutput>> + Send + '_>>
        + Send
        + Sync,
>;

pub struct RegisteredTool {
    definition: ToolDefinition,
    executor: ToolExecutorFn,
}

impl RegisteredTool {
    #[must_use]
    pub fn new(definition: ToolDefinition, executor: ToolExecutorFn) -> Self {
        Self { definition, executor }
    }

    #[must_use]
    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    pub async fn execute(&self, args: Value, env: &dyn ExecutionEnvironment) -> AgentResult<ToolOutput> {
        (self.executor)(args, env).await
    }
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// An ordered table of callable tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, RegisteredTool>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert. Re-registering a name replaces it in place,
    /// preserving its original position.
    pub fn register(&mut self, tool: RegisteredTool) -> AgentResult<()> {
        tool.definition.validate()?;
        self.tools.insert(tool.definition.name.clone(), tool);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.shift_remove(name).is_some()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate call arguments against a tool's JSON Schema. A schema that
    /// fails to compile is treated as permissive rather than fatal — the
    /// tool author's mistake shouldn't block every future call.
    pub fn validate_arguments(&self, name: &str, args: &Value) -> AgentResult<()> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool { name: name.to_string() })?;

        let Ok(validator) = jsonschema::validator_for(&tool.definition.parameters) else {
            return Ok(());
        };

        let errors: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AgentError::ValidationError {
                reason: errors.join("; "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_tool(name: &str, parameters: Value) -> RegisteredTool {
        RegisteredTool::new(
            ToolDefinition {
                name: name.into(),
                description: "a test tool".into(),
                parameters,
            },
            Box::new(|_args, _env| Box::pin(async { Ok(ToolOutput::Text("ok".into())) })),
        )
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(noop_tool("echo", json!({"type": "object"}))).unwrap();
        assert!(registry.get("echo").is_some());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[test]
    fn rejects_empty_description() {
        let mut registry = ToolRegistry::new();
        let tool = RegisteredTool::new(
            ToolDefinition {
                name: "bad".into(),
                description: String::new(),
                parameters: json!({"type": "object"}),
            },
            Box::new(|_args, _env| Box::pin(async { Ok(ToolOutput::Text(String::new())) })),
        );
        assert!(registry.register(tool).is_err());
    }

    #[test]
    fn unregister_removes_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(noop_tool("echo", json!({"type": "object"}))).unwrap();
        assert!(registry.unregister("echo"));
        assert!(registry.is_empty());
    }

    #[test]
    fn validate_arguments_rejects_schema_violation() {
        let mut registry = ToolRegistry::new();
        registry
            .register(noop_tool(
                "echo",
                json!({"type": "object", "required": ["text"], "properties": {"text": {"type": "string"}}}),
            ))
            .unwrap();
        assert!(registry.validate_arguments("echo", &json!({})).is_err());
        assert!(registry.validate_arguments("echo", &json!({"text": "hi"})).is_ok());
    }

    #[test]
    fn validate_arguments_unknown_tool() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.validate_arguments("nope", &json!({})),
            Err(AgentError::UnknownTool { .. })
        ));
    }
}
