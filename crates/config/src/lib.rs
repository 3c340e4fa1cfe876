//! Configuration loading, validation, and management for DataRouter.
//!
//! Loads configuration from `~/.datarouter/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.datarouter/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default reasoning engine provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per engine response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Extra providers tried, in order, after the default one fails
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_providers: Vec<String>,

    /// Orchestrator loop settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Tabular data source
    #[serde(default)]
    pub data: DataConfig,

    /// Chart generation settings
    #[serde(default)]
    pub chart: ChartConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    2048
}

const REDACTED: &str = "[REDACTED]";

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => REDACTED,
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("fallback_providers", &self.fallback_providers)
            .field("orchestrator", &self.orchestrator)
            .field("data", &self.data)
            .field("chart", &self.chart)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful data analysis assistant. \
Use the available capabilities to look up data from the dataset, analyze it, and \
generate chart specifications when a visualization is requested. Call capabilities \
only when you need them, and answer the user directly once you have what you need.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum engine calls per interaction before giving up
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// System prompt ensured at the start of every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Buffered domain events per subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.into()
}
fn default_event_capacity() -> usize {
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: default_system_prompt(),
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// CSV or JSON file loaded into the tabular store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Name the table is presented under to the engine
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Maximum rows rendered in a lookup result
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

fn default_table_name() -> String {
    "sales".into()
}
fn default_max_rows() -> usize {
    50
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            path: None,
            table_name: default_table_name(),
            max_rows: default_max_rows(),
        }
    }
}

/// What to do when the engine returns structured output that does not parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedOutputPolicy {
    /// Report invalid arguments so the engine can try again
    #[default]
    Fail,
    /// Substitute a named default and carry on
    Fallback,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartConfig {
    #[serde(default)]
    pub on_malformed_config: MalformedOutputPolicy,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Per-request timeout, also used as the fallback-chain deadline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.datarouter/config.toml).
    ///
    /// Also checks environment variables:
    /// - `DATAROUTER_API_KEY` (highest priority), `OPENROUTER_API_KEY`, `OPENAI_API_KEY`
    /// - `DATAROUTER_PROVIDER`, `DATAROUTER_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("DATAROUTER_API_KEY")
                .or_else(|| lookup("OPENROUTER_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(provider) = lookup("DATAROUTER_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("DATAROUTER_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".datarouter")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.orchestrator.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_iterations must be at least 1".into(),
            ));
        }

        if self.data.max_rows == 0 {
            return Err(ConfigError::ValidationError(
                "data.max_rows must be at least 1".into(),
            ));
        }

        if self.data.table_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "data.table_name must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// A copy with every secret replaced, safe to print.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.api_key.is_some() {
            config.api_key = Some(REDACTED.into());
        }
        for provider in config.providers.values_mut() {
            if provider.api_key.is_some() {
                provider.api_key = Some(REDACTED.into());
            }
        }
        config
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            fallback_providers: vec![],
            orchestrator: OrchestratorConfig::default(),
            data: DataConfig::default(),
            chart: ChartConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
