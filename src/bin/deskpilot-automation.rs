use std::path::PathBuf;

use clap::Parser;

/// Desktop automation tools served over MCP on stdin/stdout.
#[derive(Debug, Parser)]
#[command(name = "deskpilot-automation", version, about)]
struct Cli {
    /// Path to config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Pause after every input action, in milliseconds
    #[arg(long, value_name = "MS")]
    pause_ms: Option<u64>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    deskpilot_lib::logging::init_server_logging();

    let options = deskpilot_lib::ServerOptions {
        config_path: cli.config,
        pause_ms: cli.pause_ms,
    };
    if let Err(e) = deskpilot_lib::run_automation_server(options).await {
        tracing::error!(error = %e, "automation server failed");
        eprintln!("deskpilot-automation: {e}");
        std::process::exit(1);
    }
}
