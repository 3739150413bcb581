//! The `echo` tool.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::mcp::tools::{parse_arguments, ToolContext, ToolError, ToolHandler};
use crate::mcp::types::{ToolCallResult, ToolDefinition};

#[derive(Debug, Deserialize)]
struct EchoArgs {
    text: String,
}

/// Echoes the provided text back to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: Some("Echo the provided text".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "Text to echo back"
                    }
                },
                "required": ["text"]
            }),
        }
    }

    async fn call(
        &self,
        arguments: Map<String, Value>,
        _ctx: ToolContext,
    ) -> Result<ToolCallResult, ToolError> {
        let args: EchoArgs = parse_arguments(arguments)?;
        Ok(ToolCallResult::text(args.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn echoes_text() {
        let result = EchoTool
            .call(args(json!({ "text": "Hello World!" })), ToolContext::detached())
            .await
            .unwrap();
        assert_eq!(result, ToolCallResult::text("Hello World!"));
    }

    #[tokio::test]
    async fn missing_text_is_invalid() {
        let err = EchoTool
            .call(Map::new(), ToolContext::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn schema_requires_text() {
        let definition = EchoTool.definition();
        assert_eq!(definition.name, "echo");
        assert_eq!(definition.input_schema["required"][0], "text");
    }
}
