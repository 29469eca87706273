//! Tracing setup for both processes.
//!
//! The host owns the terminal, so it logs to a file. The automation server
//! speaks the protocol on stdout, so it logs to stderr.
//!
//! Filter directives come from `DESKPILOT_LOG`, then `RUST_LOG`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::errors::{DeskPilotError, DeskPilotResult};

pub const LOG_ENV: &str = "DESKPILOT_LOG";
const DEFAULT_FILTER: &str = "deskpilot_lib=info,deskpilot=info,warn";
const HOST_LOG_FILE: &str = "deskpilot.log";

fn env_filter() -> EnvFilter {
    let directives = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// `<data_local_dir>/deskpilot/logs`, or `./logs` when the platform has none.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("deskpilot"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("logs")
}

/// Route all tracing output of the host to `<dir>/deskpilot.log` (appending).
/// Returns the log file path.
pub fn init_host_logging(dir: &Path) -> DeskPilotResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(HOST_LOG_FILE);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_thread_names(true)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| DeskPilotError::Config(format!("logging already initialised: {e}")))?;
    Ok(path)
}

/// Route tracing output of the automation server to stderr.
pub fn init_server_logging() {
    let result = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init();
    if let Err(e) = result {
        eprintln!("deskpilot-automation: logging not initialised: {e}");
    }
}
