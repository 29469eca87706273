use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::automation::tools::ToolSet;
use crate::errors::DeskPilotResult;
use crate::mcp::protocol::{
    CallToolParams, CallToolResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpTool,
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND,
    PARSE_ERROR, PROTOCOL_VERSION,
};

pub const SERVER_NAME: &str = "deskpilot-automation";

/// Serves the desktop tool catalog over newline-delimited JSON-RPC.
/// Requests are handled one at a time.
pub struct McpServer {
    tools: Arc<ToolSet>,
    catalog: Vec<McpTool>,
}

type RpcError = (i64, String);

impl McpServer {
    pub fn new(tools: ToolSet) -> Self {
        Self {
            tools: Arc::new(tools),
            catalog: ToolSet::catalog(),
        }
    }

    pub async fn serve_stdio(&self) -> DeskPilotResult<()> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Run until `reader` reaches end of input.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> DeskPilotResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(tools = self.catalog.len(), "automation server ready");
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                tracing::info!("input closed, automation server stopping");
                return Ok(());
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(trimmed).await {
                let mut out = serde_json::to_vec(&response)?;
                out.push(b'\n');
                writer.write_all(&out).await?;
                writer.flush().await?;
            }
        }
    }

    /// Response for one input line, or `None` for notifications.
    async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request");
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
            }
        };
        let id = raw.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => {
                return Some(JsonRpcResponse::failure(
                    id,
                    INVALID_REQUEST,
                    format!("Invalid request: {e}"),
                ))
            }
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::failure(
                id,
                INVALID_REQUEST,
                format!("Invalid request: unsupported jsonrpc version '{}'", request.jsonrpc),
            ));
        }
        if request.is_notification() {
            tracing::debug!(method = %request.method, "notification received");
            return None;
        }

        tracing::debug!(method = %request.method, id = %id, "request received");
        Some(match self.dispatch(&request.method, request.params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => {
                tracing::warn!(method = %request.method, code, %message, "request failed");
                JsonRpcResponse::failure(id, code, message)
            }
        })
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        match method {
            "initialize" => {
                if let Some(version) = params
                    .as_ref()
                    .and_then(|p| p.get("protocolVersion"))
                    .and_then(|v| v.as_str())
                {
                    if version != PROTOCOL_VERSION {
                        tracing::info!(client_version = version, "answering with {PROTOCOL_VERSION}");
                    }
                }
                Ok(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
                }))
            }
            "ping" => Ok(json!({})),
            "tools/list" => to_value(&ListToolsResult {
                tools: self.catalog.clone(),
                next_cursor: None,
            }),
            "tools/call" => self.call_tool(params).await,
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        }
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params: CallToolParams = params
            .ok_or_else(|| "missing params".to_string())
            .and_then(|p| serde_json::from_value(p).map_err(|e| e.to_string()))
            .map_err(|e| (INVALID_PARAMS, format!("Invalid params: {e}")))?;

        let tools = Arc::clone(&self.tools);
        let name = params.name.clone();
        let outcome = tokio::task::spawn_blocking(move || tools.call(&params.name, params.arguments))
            .await
            .map_err(|e| (INTERNAL_ERROR, format!("tool '{name}' crashed: {e}")))?;

        match outcome {
            Ok(outcome) => to_value(&CallToolResult::text(outcome.into_text())),
            // Only an unknown tool name ends up here.
            Err(e) => Err((INVALID_PARAMS, e.to_string())),
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| (INTERNAL_ERROR, e.to_string()))
}
