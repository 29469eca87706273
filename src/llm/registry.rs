use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig};
use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    /// Kept for model / temperature lookups.
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(active: String, llm_config: LlmConfig) -> Self {
        Self {
            providers: HashMap::new(),
            active,
            llm_config,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> DeskPilotResult<Arc<dyn LlmProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            DeskPilotError::Config(format!(
                "Active provider '{}' not found in registry",
                self.active
            ))
        })
    }

    pub fn set_active(&mut self, name: String) -> DeskPilotResult<()> {
        if self.providers.contains_key(&name) {
            self.active = name;
            Ok(())
        } else {
            Err(DeskPilotError::Config(format!("Provider '{name}' not registered")))
        }
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// The active provider together with the model settings of its config entry.
    pub fn resolve(&self) -> DeskPilotResult<(Arc<dyn LlmProvider>, CallConfig)> {
        let provider = self.get_active()?;
        let cfg = match self.llm_config.providers.get(&self.active) {
            Some(entry) => CallConfig {
                model: entry.model.clone(),
                stream: entry.stream,
                temperature: entry.temperature,
            },
            None => CallConfig {
                model: String::new(),
                stream: false,
                temperature: 0.1,
            },
        };
        tracing::debug!(
            provider = %self.active,
            model = %cfg.model,
            stream = cfg.stream,
            temperature = cfg.temperature,
            "resolved call config"
        );
        Ok((provider, cfg))
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from environment variables named `DESKPILOT_<ID>_API_KEY`.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new(config.llm.active_provider.clone(), config.llm.clone());
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(api_key_env(id))
                .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default());
            let provider =
                OpenAiCompatibleProvider::new(id.clone(), entry.api_base.clone(), api_key);
            registry.register(Arc::new(provider));
        }
        registry
    }
}

fn api_key_env(id: &str) -> String {
    let id: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("DESKPILOT_{id}_API_KEY")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, ProviderEntry};

    #[test]
    fn default_config_resolves_local_ollama() {
        let registry = ProviderRegistry::from_config(&AppConfig::default());
        let (provider, cfg) = registry.resolve().unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(cfg.model, "qwen2.5:7b");
        assert!(!cfg.stream);
    }

    #[test]
    fn set_active_switches_call_config() {
        let mut config = AppConfig::default();
        config.llm.providers.insert(
            "remote".into(),
            ProviderEntry {
                display_name: "Remote".into(),
                api_base: "https://example.invalid/v1/chat/completions".into(),
                model: "big".into(),
                temperature: 0.3,
                stream: true,
                api_key: Some("k".into()),
            },
        );
        let mut registry = ProviderRegistry::from_config(&config);
        assert_eq!(registry.list_names(), vec!["ollama".to_string(), "remote".to_string()]);

        registry.set_active("remote".into()).unwrap();
        let (_, cfg) = registry.resolve().unwrap();
        assert_eq!(cfg.model, "big");
        assert!(cfg.stream);
        assert!(registry.set_active("nope".into()).is_err());
    }

    #[test]
    fn unknown_active_provider_fails_to_resolve() {
        let config = parse_config("[llm]\nactive_provider = \"ghost\"\n").unwrap();
        let registry = ProviderRegistry::from_config(&config);
        assert!(matches!(registry.resolve(), Err(DeskPilotError::Config(_))));
    }

    #[test]
    fn env_name_is_sanitised() {
        assert_eq!(api_key_env("open-router"), "DESKPILOT_OPEN_ROUTER_API_KEY");
    }
}
