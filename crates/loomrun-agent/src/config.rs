//! File-based configuration.
//!
//! ```toml
//! [agent]
//! system_prompt = "You are a helpful shop assistant."
//!
//! [orchestrator]
//! thread_idle_ttl_secs = 3600
//!
//! [fallback]
//! retry_delay_ms = 1000
//!
//! [[models]]
//! name = "primary"
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//! ```
//!
//! Models are tried in file order.  API keys never live in the file; each
//! model names the environment variable holding its key.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AgentError, Result};
use crate::input::TranscriptInputBuilder;
use crate::llm::{FallbackModelChain, ModelBackend, OpenAiBackend, OpenAiConfig};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoomrunConfig {
    pub agent: AgentSection,
    pub orchestrator: OrchestratorSection,
    pub fallback: FallbackSection,
    pub models: Vec<ModelSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// Unset means threads are only evicted explicitly.
    pub thread_idle_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSection {
    pub retry_delay_ms: u64,
}

impl Default for FallbackSection {
    fn default() -> Self {
        Self {
            retry_delay_ms: 1_000,
        }
    }
}

/// One OpenAI-compatible model endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSection {
    pub name: String,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.  Unset for keyless local
    /// servers.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl LoomrunConfig {
    /// Load from a TOML file.  A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "configuration file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| AgentError::Config {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), models = config.models.len(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| AgentError::Config {
            reason: format!("failed to parse TOML config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (i, model) in self.models.iter().enumerate() {
            for (field, value) in [
                ("name", &model.name),
                ("base_url", &model.base_url),
                ("model", &model.model),
            ] {
                if value.trim().is_empty() {
                    return Err(AgentError::Config {
                        reason: format!("models[{i}].{field} must not be empty"),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.fallback.retry_delay_ms)
    }

    pub fn thread_idle_ttl(&self) -> Option<Duration> {
        self.orchestrator
            .thread_idle_ttl_secs
            .map(Duration::from_secs)
    }

    pub fn input_builder(&self) -> TranscriptInputBuilder {
        match &self.agent.system_prompt {
            Some(prompt) => TranscriptInputBuilder::new().with_system_prompt(prompt.clone()),
            None => TranscriptInputBuilder::new(),
        }
    }

    /// Build the model chain, reading API keys from the process environment.
    pub fn build_chain(&self) -> Result<FallbackModelChain> {
        self.build_chain_with(|key| std::env::var(key).ok())
    }

    /// Build the model chain with a custom key lookup.
    ///
    /// A model whose key variable is unset or empty is skipped with a
    /// warning; if that leaves nothing the chain cannot be built.
    pub fn build_chain_with<F>(&self, lookup: F) -> Result<FallbackModelChain>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut models: Vec<Arc<dyn ModelBackend>> = Vec::with_capacity(self.models.len());

        for section in &self.models {
            let api_key = match &section.api_key_env {
                Some(var) => match lookup(var).filter(|k| !k.trim().is_empty()) {
                    Some(key) => Some(key),
                    None => {
                        warn!(model = %section.name, env = %var, "API key not set, skipping model");
                        continue;
                    }
                },
                None => None,
            };

            let mut config =
                OpenAiConfig::new(&section.name, &section.base_url, &section.model);
            config.temperature = section.temperature;
            config.max_tokens = section.max_tokens;
            config.timeout = Duration::from_secs(section.timeout_secs);
            if let Some(key) = api_key {
                config = config.with_api_key(key);
            }

            let backend = OpenAiBackend::new(config).map_err(|e| AgentError::Config {
                reason: format!("model `{}`: {e}", section.name),
            })?;
            models.push(Arc::new(backend));
        }

        let chain = FallbackModelChain::new(models)?.with_retry_delay(self.retry_delay());
        info!(models = ?chain.names(), "model chain ready");
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[agent]
system_prompt = "Be brief."

[orchestrator]
thread_idle_ttl_secs = 600

[fallback]
retry_delay_ms = 250

[[models]]
name = "primary"
base_url = "https://api.example.com/v1"
model = "large"
api_key_env = "PRIMARY_KEY"

[[models]]
name = "local"
base_url = "http://127.0.0.1:11434/v1"
model = "small"
timeout_secs = 5
"#;

    #[test]
    fn parses_all_sections() {
        let config = LoomrunConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.agent.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(config.thread_idle_ttl(), Some(Duration::from_secs(600)));
        assert_eq!(config.retry_delay(), Duration::from_millis(250));
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[0].timeout_secs, 30);
        assert_eq!(config.models[1].timeout_secs, 5);
        assert!(config.models[1].api_key_env.is_none());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = LoomrunConfig::from_toml_str("").unwrap();
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert!(config.thread_idle_ttl().is_none());
        assert!(config.models.is_empty());
    }

    #[test]
    fn blank_model_fields_are_rejected() {
        let err = LoomrunConfig::from_toml_str(
            "[[models]]\nname = \"x\"\nbase_url = \" \"\nmodel = \"m\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("models[0].base_url"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoomrunConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, LoomrunConfig::default());
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = LoomrunConfig::load(file.path()).unwrap();
        assert_eq!(config.models[0].name, "primary");
    }

    #[test]
    fn chain_skips_models_without_keys() {
        let config = LoomrunConfig::from_toml_str(SAMPLE).unwrap();

        let chain = config.build_chain_with(|_| None).unwrap();
        assert_eq!(chain.names(), ["local"]);
        assert_eq!(chain.retry_delay(), Duration::from_millis(250));

        let chain = config
            .build_chain_with(|var| (var == "PRIMARY_KEY").then(|| "sk-test".to_owned()))
            .unwrap();
        assert_eq!(chain.names(), ["primary", "local"]);
    }

    #[test]
    fn chain_without_usable_models_is_an_error() {
        let err = LoomrunConfig::default().build_chain_with(|_| None).unwrap_err();
        assert!(matches!(err, AgentError::EmptyModelChain));
    }
}
