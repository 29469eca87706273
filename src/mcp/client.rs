use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::config::McpServerEntry;
use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::mcp::protocol::{
    CallToolResult, Implementation, InitializeResult, JsonRpcRequest, ListToolsResult, McpTool,
    PROTOCOL_VERSION,
};
use crate::mcp::stdio_transport::StdioTransport;
use crate::mcp::transport::McpTransport;

/// Guards against servers that keep returning a cursor.
const MAX_LIST_PAGES: usize = 64;

/// Client side of one MCP server connection.
pub struct McpClient {
    server_name: String,
    transport: Box<dyn McpTransport>,
    next_id: AtomicU64,
}

impl McpClient {
    pub fn new(server_name: impl Into<String>, transport: Box<dyn McpTransport>) -> Self {
        Self {
            server_name: server_name.into(),
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    /// Spawn the configured server and complete the handshake.
    pub async fn connect_stdio(entry: &McpServerEntry) -> DeskPilotResult<Self> {
        let transport = StdioTransport::spawn(entry).await?;
        let mut client = Self::new(entry.name.clone(), Box::new(transport));
        if let Err(e) = client.initialize().await {
            let _ = client.close().await;
            return Err(e);
        }
        Ok(client)
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> DeskPilotResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self
            .transport
            .request(JsonRpcRequest::new(id, method, params))
            .await?;
        if let Some(err) = response.error {
            return Err(DeskPilotError::Mcp(format!(
                "{} returned error {} for {method}: {}",
                self.server_name, err.code, err.message
            )));
        }
        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| {
            DeskPilotError::Mcp(format!(
                "{} sent a malformed {method} result: {e}",
                self.server_name
            ))
        })
    }

    /// `initialize` request followed by the `notifications/initialized` notification.
    pub async fn initialize(&mut self) -> DeskPilotResult<Implementation> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result: InitializeResult = self.call("initialize", Some(params)).await?;
        if result.protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                server = %self.server_name,
                version = %result.protocol_version,
                "MCP server negotiated a different protocol version"
            );
        }
        self.transport
            .notify(JsonRpcRequest::notification("notifications/initialized", None))
            .await?;
        tracing::info!(
            server = %self.server_name,
            server_name = %result.server_info.name,
            server_version = %result.server_info.version,
            "MCP handshake complete"
        );
        Ok(result.server_info)
    }

    /// Full tool catalog, following pagination cursors.
    pub async fn list_tools(&self) -> DeskPilotResult<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ListToolsResult = self.call("tools/list", params).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => {
                    tracing::debug!(server = %self.server_name, count = tools.len(), "tools listed");
                    return Ok(tools);
                }
            }
        }
        Err(DeskPilotError::Mcp(format!(
            "{} returned more than {MAX_LIST_PAGES} tool pages",
            self.server_name
        )))
    }

    pub async fn call_tool(&self, name: &str, args: Value) -> DeskPilotResult<CallToolResult> {
        tracing::debug!(server = %self.server_name, tool = name, "calling tool");
        self.call("tools/call", Some(json!({ "name": name, "arguments": args })))
            .await
    }

    /// Liveness check; any non-error reply counts.
    pub async fn ping(&self) -> DeskPilotResult<()> {
        let _: Value = self.call("ping", None).await?;
        Ok(())
    }

    pub async fn close(&self) -> DeskPilotResult<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{JsonRpcResponse, ToolContent, METHOD_NOT_FOUND};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers from a fixed script and records everything sent.
    struct ScriptedTransport {
        sent: Mutex<Vec<JsonRpcRequest>>,
        replies: Mutex<Vec<Value>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Value>) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                replies: Mutex::new(replies.into_iter().rev().collect()),
            }
        }
    }

    #[async_trait]
    impl McpTransport for std::sync::Arc<ScriptedTransport> {
        async fn request(&self, request: JsonRpcRequest) -> DeskPilotResult<JsonRpcResponse> {
            let id = request.id.clone().unwrap_or(Value::Null);
            self.sent.lock().unwrap().push(request);
            let reply = self.replies.lock().unwrap().pop().expect("script exhausted");
            if let Some(code) = reply.get("error_code").and_then(|c| c.as_i64()) {
                return Ok(JsonRpcResponse::failure(id, code, "nope"));
            }
            Ok(JsonRpcResponse::success(id, reply))
        }

        async fn notify(&self, notification: JsonRpcRequest) -> DeskPilotResult<()> {
            self.sent.lock().unwrap().push(notification);
            Ok(())
        }

        async fn close(&self) -> DeskPilotResult<()> {
            Ok(())
        }
    }

    fn client(replies: Vec<Value>) -> (McpClient, std::sync::Arc<ScriptedTransport>) {
        let transport = std::sync::Arc::new(ScriptedTransport::new(replies));
        (McpClient::new("desk", Box::new(transport.clone())), transport)
    }

    #[tokio::test]
    async fn handshake_sends_initialized_notification() {
        let (mut client, transport) = client(vec![json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "deskpilot-automation", "version": "0.1.0"}
        })]);
        let info = client.initialize().await.unwrap();
        assert_eq!(info.name, "deskpilot-automation");

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].method, "initialize");
        assert_eq!(sent[0].params.as_ref().unwrap()["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(sent[1].method, "notifications/initialized");
        assert!(sent[1].is_notification());
    }

    #[tokio::test]
    async fn list_tools_follows_cursor_with_increasing_ids() {
        let (client, transport) = client(vec![
            json!({"tools": [{"name": "click_at", "description": "", "inputSchema": {}}], "nextCursor": "p2"}),
            json!({"tools": [{"name": "wait", "description": "", "inputSchema": {}}]}),
        ]);
        let tools = client.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["click_at", "wait"]);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].id, Some(json!(1)));
        assert_eq!(sent[1].id, Some(json!(2)));
        assert_eq!(sent[1].params.as_ref().unwrap()["cursor"], "p2");
    }

    #[tokio::test]
    async fn call_tool_returns_content() {
        let (client, _) = client(vec![json!({
            "content": [{"type": "text", "text": "Waited 1 seconds"}],
            "isError": false
        })]);
        let result = client.call_tool("wait", json!({"seconds": 1})).await.unwrap();
        assert_eq!(
            result.content,
            vec![ToolContent::Text { text: "Waited 1 seconds".into() }]
        );
    }

    #[tokio::test]
    async fn rpc_error_becomes_mcp_error() {
        let (client, _) = client(vec![json!({"error_code": METHOD_NOT_FOUND})]);
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, DeskPilotError::Mcp(ref m) if m.contains("-32601")));
    }
}
