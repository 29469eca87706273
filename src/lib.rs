pub mod agent_engine;
pub mod automation;
pub mod bridge;
pub mod config;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod mcp;
pub mod ui;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::automation::backend::EnigoBackend;
use crate::automation::tools::ToolSet;
use crate::bridge::AsyncBridge;
use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::mcp::server::McpServer;

/// Command-line overrides for the agent host.
#[derive(Debug, Clone, Default)]
pub struct HostOptions {
    pub config_path: Option<PathBuf>,
    pub step_limit: Option<u32>,
}

/// Command-line overrides for the automation server.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub config_path: Option<PathBuf>,
    pub pause_ms: Option<u64>,
}

/// Run the agent host: bridge thread, terminal UI, MCP session.
pub fn run(options: HostOptions) -> DeskPilotResult<()> {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();
    let log_path = logging::init_host_logging(&logging::default_log_dir())?;

    let config = config::load_config(options.config_path.as_deref())?;
    let (config, step_limit) = apply_step_limit(config, options.step_limit)?;
    tracing::info!(
        log = %log_path.display(),
        step_limit,
        provider = %config.llm.active_provider,
        servers = config.mcp.servers.len(),
        "starting deskpilot"
    );

    let bridge = Arc::new(AsyncBridge::start()?);
    let result = ui::run(Arc::clone(&bridge), config, step_limit);
    bridge.join()?;
    tracing::info!("deskpilot exited");
    result
}

/// Fold the command-line step limit into the config so later validation
/// sees the value that is actually used.
fn apply_step_limit(
    mut config: config::AppConfig,
    step_limit: Option<u32>,
) -> DeskPilotResult<(config::AppConfig, u32)> {
    if let Some(limit) = step_limit {
        config.agent.step_limit = limit;
    }
    if config.agent.step_limit == 0 {
        return Err(DeskPilotError::Config("--step-limit must be at least 1".into()));
    }
    let limit = config.agent.step_limit;
    Ok((config, limit))
}

/// Serve the desktop tool catalog on stdin/stdout until the client hangs up.
pub async fn run_automation_server(options: ServerOptions) -> DeskPilotResult<()> {
    let _ = dotenvy::dotenv();
    let config = config::load_config(options.config_path.as_deref())?;
    let pause_ms = options.pause_ms.unwrap_or(config.automation.pause_ms);
    tracing::info!(pause_ms, "starting automation server");

    let backend = EnigoBackend::new(Duration::from_millis(pause_ms));
    McpServer::new(ToolSet::new(Arc::new(backend)))
        .serve_stdio()
        .await
}
