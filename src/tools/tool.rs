//! Tool trait definition
//!
//! All tools exposed to the primary session implement this trait.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::Channel;

/// Result of executing a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The output of the tool
    pub output: String,
    /// Whether the tool execution resulted in an error
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful tool result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    /// Create an error tool result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: message.into(),
            is_error: true,
        }
    }
}

/// JSON schema for tool input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchema {
    /// Type (always "object")
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Properties of the input object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,

    /// Required properties
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl ToolInputSchema {
    /// Create an object schema with the given properties and required fields
    pub fn object(properties: Value, required: &[&str]) -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: Some(properties),
            required: if required.is_empty() {
                None
            } else {
                Some(required.iter().map(|s| s.to_string()).collect())
            },
        }
    }
}

/// Definition of a tool as advertised to the agent host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,

    /// Tool description
    pub description: String,

    /// JSON schema for the tool input
    pub input_schema: ToolInputSchema,
}

/// Hidden context passed to tools during execution
///
/// Not part of the tool's JSON schema. Carries the channel of the primary
/// turn that is in flight when the tool is invoked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolContext {
    /// Channel whose turn triggered this invocation
    pub origin: Option<Channel>,
}

impl ToolContext {
    /// Create a context for a turn originating from `origin`
    pub fn new(origin: Channel) -> Self {
        Self {
            origin: Some(origin),
        }
    }
}

/// Trait for tools that the primary session can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the name of this tool
    fn name(&self) -> &str;

    /// Get a description of this tool
    fn description(&self) -> &str;

    /// Get the tool definition advertised to the agent host
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given input
    ///
    /// The input is a JSON value that matches the tool's input schema.
    /// Logical failures are reported as `ToolResult::error`, not `Err`.
    async fn execute(&self, input: &Value, ctx: &ToolContext) -> Result<ToolResult>;
}
