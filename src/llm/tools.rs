use crate::llm::types::{FunctionDef, ToolDef};
use crate::mcp::protocol::McpTool;

/// Converts a discovered MCP catalog into function-calling definitions.
/// A missing or non-object schema becomes an empty object schema.
pub fn tool_defs_from_mcp(tools: &[McpTool]) -> Vec<ToolDef> {
    tools
        .iter()
        .map(|t| ToolDef {
            def_type: "function".to_string(),
            function: FunctionDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: if t.input_schema.is_object() {
                    t.input_schema.clone()
                } else {
                    serde_json::json!({"type": "object", "properties": {}})
                },
            },
        })
        .collect()
}
