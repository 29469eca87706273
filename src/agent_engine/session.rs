use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::agent_engine::engine::{ReactAgent, ToolExecutor};
use crate::agent_engine::transcript::Transcript;
use crate::config::AppConfig;
use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::registry::ProviderRegistry;
use crate::llm::tools::tool_defs_from_mcp;
use crate::llm::types::{CallConfig, ToolDef};
use crate::mcp::client::McpClient;

/// Maps tool names to the MCP connection that serves them.
pub struct ToolRouter {
    clients: Vec<McpClient>,
    routes: HashMap<String, usize>,
    defs: Vec<ToolDef>,
}

impl ToolRouter {
    pub fn new(clients: Vec<McpClient>) -> Self {
        Self {
            clients,
            routes: HashMap::new(),
            defs: Vec::new(),
        }
    }

    /// List every server's tools. On duplicate names the first server wins.
    pub async fn discover(&mut self) -> DeskPilotResult<()> {
        self.routes.clear();
        self.defs.clear();
        for (idx, client) in self.clients.iter().enumerate() {
            let tools = client.list_tools().await?;
            let mut fresh = Vec::with_capacity(tools.len());
            for tool in tools {
                if let Some(&owner) = self.routes.get(&tool.name) {
                    tracing::warn!(
                        tool = %tool.name,
                        server = %client.server_name(),
                        kept = %self.clients[owner].server_name(),
                        "duplicate tool name, keeping the first server's"
                    );
                    continue;
                }
                self.routes.insert(tool.name.clone(), idx);
                fresh.push(tool);
            }
            tracing::info!(server = %client.server_name(), tools = fresh.len(), "tools discovered");
            self.defs.extend(tool_defs_from_mcp(&fresh));
        }
        Ok(())
    }

    pub fn tool_defs(&self) -> &[ToolDef] {
        &self.defs
    }

    pub fn tool_count(&self) -> usize {
        self.defs.len()
    }

    /// Close every connection and forget them.
    pub async fn close_all(&mut self) {
        for client in self.clients.drain(..) {
            if let Err(e) = client.close().await {
                tracing::warn!(server = %client.server_name(), error = %e, "closing MCP connection failed");
            }
        }
        self.routes.clear();
    }
}

#[async_trait]
impl ToolExecutor for ToolRouter {
    fn has_tool(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    async fn execute(&self, name: &str, args: Value) -> DeskPilotResult<String> {
        let client = self
            .routes
            .get(name)
            .and_then(|&idx| self.clients.get(idx))
            .ok_or_else(|| DeskPilotError::Mcp(format!("no server provides '{name}'")))?;
        let result = client.call_tool(name, args).await?;
        if result.is_error {
            tracing::warn!(server = %client.server_name(), tool = name, "tool reported an error");
        }
        Ok(result.joined_text())
    }
}

/// MCP connections plus the agent bound to their tool catalog.
pub struct AgentSession {
    agent: ReactAgent,
    router: ToolRouter,
    closed: bool,
}

impl AgentSession {
    /// Connect every enabled server and bind its tools to the configured model.
    pub async fn initialize(config: &AppConfig) -> DeskPilotResult<Self> {
        config.validate()?;
        let (provider, call_config) = ProviderRegistry::from_config(config).resolve()?;

        let mut clients = Vec::new();
        for entry in config.mcp.servers.iter().filter(|s| s.enabled) {
            match McpClient::connect_stdio(entry).await {
                Ok(client) => clients.push(client),
                Err(e) => {
                    tracing::error!(server = %entry.name, error = %e, "MCP server unavailable");
                    ToolRouter::new(clients).close_all().await;
                    return Err(e);
                }
            }
        }
        Self::with_clients(provider, call_config, config.agent.system_prompt.clone(), clients).await
    }

    /// Build a session over already initialized clients.
    pub async fn with_clients(
        provider: Arc<dyn LlmProvider>,
        call_config: CallConfig,
        system_prompt: Option<String>,
        clients: Vec<McpClient>,
    ) -> DeskPilotResult<Self> {
        let mut router = ToolRouter::new(clients);
        if let Err(e) = router.discover().await {
            router.close_all().await;
            return Err(e);
        }
        let agent = ReactAgent::new(provider, call_config, router.tool_defs().to_vec(), system_prompt);
        tracing::info!(tools = agent.tool_count(), "agent session ready");
        Ok(Self {
            agent,
            router,
            closed: false,
        })
    }

    pub fn tool_count(&self) -> usize {
        self.router.tool_count()
    }

    pub async fn run(&self, user_text: &str, step_limit: u32) -> DeskPilotResult<Transcript> {
        if self.closed {
            return Err(DeskPilotError::Agent("session is shut down".into()));
        }
        self.agent.run(&self.router, user_text, step_limit).await
    }

    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.router.close_all().await;
        tracing::info!("agent session shut down");
    }
}

enum SessionCommand {
    Run {
        text: String,
        step_limit: u32,
        reply: oneshot::Sender<DeskPilotResult<Transcript>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a session living in a task on the runtime.
/// Commands are handled one at a time.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    tool_count: usize,
}

impl SessionHandle {
    /// Move the session into a task. Must be called from within a runtime.
    pub fn spawn(mut session: AgentSession) -> Self {
        let (tx, mut rx) = mpsc::channel::<SessionCommand>(8);
        let tool_count = session.tool_count();
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    SessionCommand::Run {
                        text,
                        step_limit,
                        reply,
                    } => {
                        let result = session.run(&text, step_limit).await;
                        let _ = reply.send(result);
                    }
                    SessionCommand::Shutdown { reply } => {
                        session.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                }
            }
            // Every handle dropped without an explicit shutdown.
            session.shutdown().await;
        });
        Self { tx, tool_count }
    }

    pub fn tool_count(&self) -> usize {
        self.tool_count
    }

    pub async fn run(&self, text: impl Into<String>, step_limit: u32) -> DeskPilotResult<Transcript> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Run {
                text: text.into(),
                step_limit,
                reply,
            })
            .await
            .map_err(|_| DeskPilotError::Agent("session is shut down".into()))?;
        rx.await
            .map_err(|_| DeskPilotError::Agent("session stopped before answering".into()))?
    }

    /// Close the session's MCP connections. Safe to call more than once.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(SessionCommand::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::engine::tests::{text_reply, tool_reply, ScriptedProvider};
    use crate::agent_engine::state::StopReason;
    use crate::agent_engine::transcript::{MessageKind, Role};
    use crate::automation::tools::ToolSet;
    use crate::mcp::server::tests::StillDesktop;
    use crate::mcp::server::McpServer;
    use crate::mcp::stdio_transport::StdioTransport;
    use std::time::Duration;
    use tokio::io::{duplex, split, BufReader};

    /// Client wired to an automation server running in this process.
    async fn in_process_client(name: &str) -> McpClient {
        let (client_end, server_end) = duplex(64 * 1024);
        let (server_read, server_write) = split(server_end);
        tokio::spawn(async move {
            McpServer::new(ToolSet::new(Arc::new(StillDesktop)))
                .serve(BufReader::new(server_read), server_write)
                .await
        });
        let (client_read, client_write) = split(client_end);
        let transport = StdioTransport::from_streams(
            name,
            BufReader::new(client_read),
            client_write,
            Duration::from_secs(5),
        );
        let mut client = McpClient::new(name, Box::new(transport));
        client.initialize().await.unwrap();
        client
    }

    fn call_config() -> CallConfig {
        CallConfig {
            model: "test".into(),
            stream: false,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn duplicate_tools_route_to_first_server() {
        let clients = vec![in_process_client("a").await, in_process_client("b").await];
        let mut router = ToolRouter::new(clients);
        router.discover().await.unwrap();
        assert_eq!(router.tool_count(), 11);
        assert_eq!(router.routes["click_at"], 0);
        assert!(router.has_tool("wait"));
        assert!(!router.has_tool("launch_rockets"));
        router.close_all().await;
        assert!(!router.has_tool("wait"));
    }

    #[tokio::test]
    async fn session_runs_tools_through_mcp() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_reply("click_at", r#"{"x":100,"y":200}"#),
            text_reply("Done clicking."),
        ]));
        let mut session = AgentSession::with_clients(
            provider,
            call_config(),
            None,
            vec![in_process_client("desktop").await],
        )
        .await
        .unwrap();

        let transcript = session.run("click at 100,200", 5).await.unwrap();
        assert_eq!(transcript.stop_reason, StopReason::Completed);
        assert_eq!(transcript.messages[2].role, Role::ToolResult);
        assert_eq!(
            transcript.messages[2].kind,
            MessageKind::Text("Clicked at (100, 200) with left button, 1 times".into())
        );

        session.shutdown().await;
        session.shutdown().await;
        assert!(session.run("again", 5).await.is_err());
    }

    #[tokio::test]
    async fn handle_serializes_commands_and_shuts_down() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text_reply("first"),
            text_reply("second"),
        ]));
        let session = AgentSession::with_clients(
            provider,
            call_config(),
            None,
            vec![in_process_client("desktop").await],
        )
        .await
        .unwrap();
        let handle = SessionHandle::spawn(session);
        assert_eq!(handle.tool_count(), 11);

        let other = handle.clone();
        let (a, b) = tokio::join!(handle.run("one", 3), other.run("two", 3));
        let mut answers = vec![
            a.unwrap().final_answer().map(str::to_string),
            b.unwrap().final_answer().map(str::to_string),
        ];
        answers.sort();
        assert_eq!(answers, vec![Some("first".to_string()), Some("second".to_string())]);

        handle.shutdown().await;
        other.shutdown().await;
        assert!(matches!(
            handle.run("late", 3).await,
            Err(DeskPilotError::Agent(_))
        ));
    }
}
