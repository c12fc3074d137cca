//! Typed tool surface exposed to the LLM (SPEC_FULL §3.6, §4.4), grounded on the parameter
//! schema shape used by `original_source/apps/agent-searcher/agent_searcher/tools.py` and
//! `.../agent-analyst/agent_analyst/tools/dispatch_tool.py`, and on the OpenAI function-calling
//! envelope serialized in `examples/CloudLLM-ai-cloudllm/src/cloudllm/clients/common.rs`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, SpiralError};

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub type ToolHandler = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// A capability the LLM can invoke. Immutable after construction.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub handler: ToolHandler,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler,
        }
    }

    /// `{"type": "function", "function": {name, description, parameters}}`, the envelope every
    /// OpenAI-compatible chat-completions endpoint expects in its `tools` array.
    pub fn schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }

    pub async fn call(&self, args: Value) -> Result<Value> {
        (self.handler)(args).await
    }

    /// Checks `args` against the tool's declared `required` fields and each present property's
    /// declared `type` (SPEC_FULL §4.5/§6.6). Not a full JSON-Schema validator — the practical
    /// subset the corpus's own tool declarations actually use.
    pub fn validate_args(&self, args: &Value) -> Result<()> {
        let Some(schema) = self.parameters.as_object() else {
            return Ok(());
        };
        let args_obj = args.as_object().ok_or_else(|| SpiralError::SchemaValidation {
            tool: self.name.clone(),
            message: "arguments must be a JSON object".to_string(),
        })?;

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for field in required {
                let Some(field) = field.as_str() else { continue };
                if !args_obj.contains_key(field) {
                    return Err(SpiralError::SchemaValidation {
                        tool: self.name.clone(),
                        message: format!("missing required field `{field}`"),
                    });
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (field, value) in args_obj {
                let Some(declared_type) = properties
                    .get(field)
                    .and_then(|p| p.get("type"))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                if !type_matches(declared_type, value) {
                    return Err(SpiralError::SchemaValidation {
                        tool: self.name.clone(),
                        message: format!("field `{field}` expected type `{declared_type}`"),
                    });
                }
            }
        }
        Ok(())
    }
}

fn type_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Lookup table a ReAct executor dispatches tool calls against.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: HashMap<String, Tool>,
}

impl ToolSet {
    pub fn new(tools: Vec<Tool>) -> Self {
        let tools = tools.into_iter().map(|t| (t.name.clone(), t)).collect();
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn schemas(&self) -> Vec<Value> {
        self.tools.values().map(Tool::schema).collect()
    }
}
