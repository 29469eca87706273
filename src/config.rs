use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{DeskPilotError, DeskPilotResult};

const CONFIG_FILE: &str = "config.toml";
const AUTOMATION_BIN: &str = "deskpilot-automation";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub active_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "ollama".to_string(),
            ProviderEntry {
                display_name: "Ollama (local)".into(),
                api_base: "http://localhost:11434/v1/chat/completions".into(),
                model: "qwen2.5:7b".into(),
                temperature: default_temperature(),
                stream: false,
                api_key: None,
            },
        );
        Self {
            active_provider: "ollama".into(),
            providers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions URL.
    pub api_base: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Use SSE streaming for completions.
    #[serde(default)]
    pub stream: bool,
    /// Falls back to env var DESKPILOT_<ID>_API_KEY when absent.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_temperature() -> f64 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model calls per command before the run is cut off.
    #[serde(default = "default_step_limit")]
    pub step_limit: u32,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            step_limit: default_step_limit(),
            system_prompt: None,
        }
    }
}

fn default_step_limit() -> u32 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default = "default_servers")]
    pub servers: Vec<McpServerEntry>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerEntry {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_servers() -> Vec<McpServerEntry> {
    vec![McpServerEntry {
        name: "desktop".into(),
        command: default_automation_command(),
        args: Vec::new(),
        env: HashMap::new(),
        enabled: true,
        timeout_secs: default_timeout_secs(),
    }]
}

/// The automation server binary shipped next to the host executable, or the
/// bare name (resolved through PATH) when it is not there.
fn default_automation_command() -> String {
    let file_name = format!("{AUTOMATION_BIN}{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
        .filter(|candidate| candidate.exists())
        .map(|candidate| candidate.display().to_string())
        .unwrap_or_else(|| AUTOMATION_BIN.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Pause after every input action.
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            pause_ms: default_pause_ms(),
        }
    }
}

fn default_pause_ms() -> u64 {
    100
}

impl AppConfig {
    /// Checks the settings the agent host needs before it can start a session.
    pub fn validate(&self) -> DeskPilotResult<()> {
        if self.agent.step_limit == 0 {
            return Err(DeskPilotError::Config("agent.step_limit must be at least 1".into()));
        }
        if !self.llm.providers.contains_key(&self.llm.active_provider) {
            return Err(DeskPilotError::Config(format!(
                "active provider '{}' is not defined under [llm.providers]",
                self.llm.active_provider
            )));
        }
        if !self.mcp.servers.iter().any(|s| s.enabled) {
            return Err(DeskPilotError::Config("no enabled [[mcp.servers]] entry".into()));
        }
        Ok(())
    }
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Some(candidate);
            }
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        let candidate = cwd.join(CONFIG_FILE);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in working directory");
            return Some(candidate);
        }
    }

    let candidate = dirs::config_dir()?.join("deskpilot").join(CONFIG_FILE);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in user config dir");
        return Some(candidate);
    }
    None
}

pub fn parse_config(content: &str) -> DeskPilotResult<AppConfig> {
    Ok(toml::from_str(content)?)
}

/// Load the configuration from `explicit`, or search the usual locations.
/// Without an explicit path, a missing file yields the defaults.
pub fn load_config(explicit: Option<&Path>) -> DeskPilotResult<AppConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match resolve_config_path() {
            Some(path) => path,
            None => {
                tracing::info!("no config.toml found, using built-in defaults");
                return Ok(AppConfig::default());
            }
        },
    };
    let content = std::fs::read_to_string(&path).map_err(|e| {
        DeskPilotError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}
