//! Configuration management for Parley
//!
//! Loads and saves backend, agent and logging settings as JSON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{config_path, data_dir, memory_dir};

/// Errors in configuration handling
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config not found: {}", .0.display())]
    NotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Which wire protocol the backend speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI-compatible chat completions (OpenAI, OpenRouter, vLLM)
    #[default]
    OpenAi,
    Anthropic,
}

impl BackendKind {
    /// Environment variable consulted when no key is configured
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

/// Agent loop and structured-function defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_tool_call_limit")]
    pub tool_call_limit: u32,
    #[serde(default = "default_recent_call_window")]
    pub recent_call_window: usize,
    #[serde(default = "default_memory_max_messages")]
    pub memory_max_messages: usize,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: default_system_prompt(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_iterations: default_max_iterations(),
            max_attempts: default_max_attempts(),
            tool_call_limit: default_tool_call_limit(),
            recent_call_window: default_recent_call_window(),
            memory_max_messages: default_memory_max_messages(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. Use the available tools when they help answer the user."
        .to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_iterations() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_tool_call_limit() -> u32 {
    10
}

fn default_recent_call_window() -> usize {
    5
}

fn default_memory_max_messages() -> usize {
    100
}

/// Console output switches for the observer hook
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub print_system_prompt: bool,
    #[serde(default)]
    pub print_messages: bool,
    #[serde(default)]
    pub print_usage_report: bool,
}

impl LoggingConfig {
    /// Everything on
    pub fn verbose() -> Self {
        Self {
            print_system_prompt: true,
            print_messages: true,
            print_usage_report: true,
        }
    }

    pub fn is_silent(&self) -> bool {
        !(self.print_system_prompt || self.print_messages || self.print_usage_report)
    }
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub agent: AgentDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from the default location
    pub async fn load() -> Result<Self> {
        let path = config_path();
        Self::load_from(&path).await
    }

    /// Load from specific location
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("no config at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        debug!("loading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save to the default location
    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("writing config to {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Configured key, falling back to the backend's environment variable
    pub fn api_key(&self) -> Option<String> {
        let key = self.backend.api_key.clone();
        if !key.is_empty() {
            return Some(key);
        }

        std::env::var(self.backend.kind.api_key_env())
            .ok()
            .filter(|k| !k.is_empty())
    }

    pub fn api_base(&self) -> Option<String> {
        self.backend
            .api_base
            .clone()
            .filter(|base| !base.is_empty())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key().is_some()
    }

    pub fn default_model(&self) -> String {
        self.agent.model.clone()
    }

    pub fn memory_max_messages(&self) -> usize {
        self.agent.memory_max_messages
    }
}

/// Write a default config if none exists and create the data directories
pub async fn init() -> Result<Config> {
    let config_path = config_path();

    if config_path.exists() {
        warn!("config already exists at {:?}", config_path);
    } else {
        let config = Config::default();
        config.save().await?;
        info!("created config at {:?}", config_path);
    }

    let memory = memory_dir();
    tokio::fs::create_dir_all(&memory).await?;
    info!("memory directory ready at {:?}", memory);

    Config::load().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_serde() {
        let kind: BackendKind = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(kind, BackendKind::Anthropic);
        assert_eq!(serde_json::to_string(&BackendKind::OpenAi).unwrap(), "\"openai\"");
    }

    #[test]
    fn test_api_key_prefers_config_value() {
        let mut config = Config::default();
        config.backend.api_key = "sk-config".to_string();
        assert_eq!(config.api_key(), Some("sk-config".to_string()));
        assert!(config.has_api_key());
    }

    #[test]
    fn test_api_base_ignores_empty() {
        let mut config = Config::default();
        config.backend.api_base = Some(String::new());
        assert!(config.api_base().is_none());

        config.backend.api_base = Some("http://localhost:8000/v1".to_string());
        assert_eq!(config.api_base().as_deref(), Some("http://localhost:8000/v1"));
    }

    #[test]
    fn test_logging_switches() {
        assert!(LoggingConfig::default().is_silent());
        assert!(!LoggingConfig::verbose().is_silent());
    }
}
