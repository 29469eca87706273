use async_trait::async_trait;

use crate::errors::DeskPilotResult;
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};

/// A JSON-RPC connection to one MCP server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for the response carrying the same id.
    async fn request(&self, request: JsonRpcRequest) -> DeskPilotResult<JsonRpcResponse>;

    /// Send a notification; no response is expected.
    async fn notify(&self, notification: JsonRpcRequest) -> DeskPilotResult<()>;

    /// Close the connection. Idempotent.
    async fn close(&self) -> DeskPilotResult<()>;
}
