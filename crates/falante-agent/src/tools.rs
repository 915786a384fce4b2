//! Callable tools with fixed typed argument schemas.
//!
//! Each tool is a named operation dispatched through a lookup table; the
//! model's JSON arguments are deserialized against the tool's own schema
//! before execution, so a malformed call fails here and never inside the
//! tool.

use crate::chat::ToolSpec;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArgs { tool: String, reason: String },

    #[error("tool {tool} failed: {reason}")]
    Failed { tool: String, reason: String },
}

/// A named operation the model may invoke during generation. Tools are pure
/// functions over structured arguments.
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema for the arguments, advertised to the model.
    fn parameters(&self) -> serde_json::Value;
    /// Execute with the model's JSON-encoded arguments.
    fn invoke(&self, arguments: &str) -> Result<serde_json::Value, ToolError>;
}

/// Argument schema shared by the arithmetic tools.
#[derive(Debug, Deserialize)]
struct OperandPair {
    a: f64,
    b: f64,
}

fn operand_pair_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "a": { "type": "number" },
            "b": { "type": "number" }
        },
        "required": ["a", "b"]
    })
}

fn parse_operands(tool: &str, arguments: &str) -> Result<OperandPair, ToolError> {
    serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArgs {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

/// Adds two numbers.
pub struct SumNumbers;

impl Tool for SumNumbers {
    fn name(&self) -> &'static str {
        "sum_numbers"
    }

    fn description(&self) -> &'static str {
        "Soma dois numeros."
    }

    fn parameters(&self) -> serde_json::Value {
        operand_pair_schema()
    }

    fn invoke(&self, arguments: &str) -> Result<serde_json::Value, ToolError> {
        let args = parse_operands(self.name(), arguments)?;
        let result = args.a + args.b;
        info!(a = args.a, b = args.b, result, "sum_numbers");
        Ok(serde_json::json!({ "result": result }))
    }
}

/// Multiplies two numbers.
pub struct MultiplyNumbers;

impl Tool for MultiplyNumbers {
    fn name(&self) -> &'static str {
        "multiply_numbers"
    }

    fn description(&self) -> &'static str {
        "Multiplica dois numeros."
    }

    fn parameters(&self) -> serde_json::Value {
        operand_pair_schema()
    }

    fn invoke(&self, arguments: &str) -> Result<serde_json::Value, ToolError> {
        let args = parse_operands(self.name(), arguments)?;
        let result = args.a * args.b;
        info!(a = args.a, b = args.b, result, "multiply_numbers");
        Ok(serde_json::json!({ "result": result }))
    }
}

/// Lookup table from tool name to implementation.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in arithmetic set.
    pub fn with_builtin_math() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SumNumbers));
        registry.register(Arc::new(MultiplyNumbers));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Specs advertised to the model alongside the conversation.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|t| ToolSpec::function(t.name(), t.description(), t.parameters()))
            .collect();
        specs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        specs
    }

    /// Resolve and execute one requested invocation.
    pub fn dispatch(&self, name: &str, arguments: &str) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        tool.invoke(arguments)
    }
}
