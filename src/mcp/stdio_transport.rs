use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::McpServerEntry;
use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::mcp::transport::McpTransport;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

type BoxReader = Box<dyn AsyncBufRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Connection {
    reader: BoxReader,
    /// `None` once closed; dropping the writer signals end of input to the server.
    writer: Option<BoxWriter>,
}

/// Newline-delimited JSON-RPC over a pair of byte streams, usually the
/// stdin/stdout of a spawned server process.
pub struct StdioTransport {
    server: String,
    conn: Mutex<Connection>,
    child: Mutex<Option<Child>>,
    request_timeout: Duration,
}

impl StdioTransport {
    /// Spawn the configured server command with piped stdio. The child's
    /// stderr is forwarded into tracing.
    pub async fn spawn(entry: &McpServerEntry) -> DeskPilotResult<Self> {
        let mut command = Command::new(&entry.command);
        command
            .args(&entry.args)
            .envs(&entry.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            DeskPilotError::Mcp(format!(
                "failed to start MCP server '{}' ({}): {e}",
                entry.name, entry.command
            ))
        })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            DeskPilotError::Mcp(format!("failed to capture stdin of '{}'", entry.name))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            DeskPilotError::Mcp(format!("failed to capture stdout of '{}'", entry.name))
        })?;
        if let Some(stderr) = child.stderr.take() {
            let server = entry.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::info!(target: "deskpilot_lib::mcp::server_stderr", server = %server, "{line}");
                }
            });
        }
        tracing::info!(
            server = %entry.name,
            command = %entry.command,
            pid = ?child.id(),
            "MCP server process started"
        );

        let mut transport = Self::from_streams(
            entry.name.clone(),
            BufReader::new(stdout),
            stdin,
            Duration::from_secs(entry.timeout_secs),
        );
        transport.child = Mutex::new(Some(child));
        Ok(transport)
    }

    /// Transport over arbitrary streams (in-memory pipes in tests).
    pub fn from_streams<R, W>(
        server: impl Into<String>,
        reader: R,
        writer: W,
        request_timeout: Duration,
    ) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            server: server.into(),
            conn: Mutex::new(Connection {
                reader: Box::new(reader),
                writer: Some(Box::new(writer)),
            }),
            child: Mutex::new(None),
            request_timeout,
        }
    }

    async fn write_message(&self, conn: &mut Connection, message: &JsonRpcRequest) -> DeskPilotResult<()> {
        let writer = conn.writer.as_mut().ok_or_else(|| {
            DeskPilotError::Mcp(format!("connection to '{}' is closed", self.server))
        })?;
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

fn matches_id(payload: &Value, id: &Value) -> bool {
    match (payload.get("id"), id) {
        (Some(Value::Number(got)), Value::Number(want)) => got == want,
        (Some(Value::String(got)), Value::Number(want)) => {
            want.as_u64().is_some_and(|w| got.parse::<u64>() == Ok(w))
        }
        (Some(got), want) => got == want,
        (None, _) => false,
    }
}

fn is_response(payload: &Value) -> bool {
    payload.get("method").is_none()
        && (payload.get("result").is_some() || payload.get("error").is_some())
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, request: JsonRpcRequest) -> DeskPilotResult<JsonRpcResponse> {
        let id = request.id.clone().unwrap_or(Value::Null);
        let mut conn = self.conn.lock().await;
        self.write_message(&mut conn, &request).await?;

        let read_until_match = async {
            let mut line = String::new();
            loop {
                line.clear();
                let read = conn.reader.read_line(&mut line).await?;
                if read == 0 {
                    return Err(DeskPilotError::Mcp(format!(
                        "MCP server '{}' closed stdout",
                        self.server
                    )));
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let payload: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(server = %self.server, error = %e, "ignoring non-JSON line from MCP server");
                        continue;
                    }
                };
                if is_response(&payload) && matches_id(&payload, &id) {
                    return Ok(serde_json::from_value::<JsonRpcResponse>(payload)?);
                }
                tracing::debug!(
                    server = %self.server,
                    method = payload.get("method").and_then(|m| m.as_str()).unwrap_or(""),
                    "skipping unrelated MCP message"
                );
            }
        };

        match timeout(self.request_timeout, read_until_match).await {
            Ok(result) => result,
            Err(_) => Err(DeskPilotError::Mcp(format!(
                "request '{}' to '{}' timed out after {}s",
                request.method,
                self.server,
                self.request_timeout.as_secs_f64()
            ))),
        }
    }

    async fn notify(&self, notification: JsonRpcRequest) -> DeskPilotResult<()> {
        let mut conn = self.conn.lock().await;
        self.write_message(&mut conn, &notification).await
    }

    async fn close(&self) -> DeskPilotResult<()> {
        let had_writer = {
            let mut conn = self.conn.lock().await;
            conn.writer.take().is_some()
        };
        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            if had_writer {
                tracing::debug!(server = %self.server, "MCP connection closed");
            }
            return Ok(());
        };

        match timeout(CLOSE_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(server = %self.server, %status, "MCP server exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(server = %self.server, error = %e, "waiting for MCP server failed");
            }
            Err(_) => {
                tracing::warn!(server = %self.server, "MCP server did not exit, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, split};

    /// Transport whose peer end is handed back to the test.
    fn pair(
        request_timeout: Duration,
    ) -> (StdioTransport, BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>, tokio::io::WriteHalf<tokio::io::DuplexStream>) {
        let (ours, theirs) = duplex(64 * 1024);
        let (r, w) = split(ours);
        let transport = StdioTransport::from_streams("test", BufReader::new(r), w, request_timeout);
        let (pr, pw) = split(theirs);
        (transport, BufReader::new(pr), pw)
    }

    #[tokio::test]
    async fn skips_notifications_until_matching_id() {
        let (transport, mut peer_in, mut peer_out) = pair(Duration::from_secs(5));

        let server = tokio::spawn(async move {
            let mut line = String::new();
            peer_in.read_line(&mut line).await.unwrap();
            let req: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(req["method"], "ping");
            let id = req["id"].clone();
            let out = format!(
                "{}\nnot json at all\n{}\n{}\n",
                json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}}),
                json!({"jsonrpc": "2.0", "id": 999, "result": {}}),
                json!({"jsonrpc": "2.0", "id": id, "result": {"ok": true}}),
            );
            peer_out.write_all(out.as_bytes()).await.unwrap();
        });

        let resp = transport
            .request(JsonRpcRequest::new(7, "ping", None))
            .await
            .unwrap();
        assert_eq!(resp.id, json!(7));
        assert_eq!(resp.result, Some(json!({"ok": true})));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn closed_stdout_is_an_mcp_error() {
        let (transport, peer_in, peer_out) = pair(Duration::from_secs(5));
        drop(peer_out);
        drop(peer_in);
        let err = transport
            .request(JsonRpcRequest::new(1, "ping", None))
            .await
            .unwrap_err();
        assert!(matches!(err, DeskPilotError::Mcp(_) | DeskPilotError::Io(_)));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (transport, _peer_in, _peer_out) = pair(Duration::from_millis(50));
        let err = transport
            .request(JsonRpcRequest::new(1, "tools/list", None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_further_requests() {
        let (transport, _peer_in, _peer_out) = pair(Duration::from_secs(1));
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        let err = transport
            .notify(JsonRpcRequest::notification("notifications/initialized", None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("closed"));
    }
}
