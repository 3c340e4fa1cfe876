//! Engine router — builds and selects reasoning engines from config.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use datarouter_config::{AppConfig, ProviderConfig};
use datarouter_core::engine::ReasoningEngine;
use tracing::debug;

use crate::fallback::FallbackEngine;
use crate::openai_compat::OpenAiCompatEngine;

/// Holds the configured engines by name.
pub struct EngineRouter {
    engines: HashMap<String, Arc<dyn ReasoningEngine>>,
    default_engine: String,
}

impl EngineRouter {
    /// Create a new router with a default engine name.
    pub fn new(default_engine: impl Into<String>) -> Self {
        Self {
            engines: HashMap::new(),
            default_engine: default_engine.into(),
        }
    }

    /// Register an engine.
    pub fn register(&mut self, name: impl Into<String>, engine: Arc<dyn ReasoningEngine>) {
        self.engines.insert(name.into(), engine);
    }

    /// Get the default engine.
    pub fn default(&self) -> Option<Arc<dyn ReasoningEngine>> {
        self.engines.get(&self.default_engine).cloned()
    }

    /// Name of the default engine.
    pub fn default_name(&self) -> &str {
        &self.default_engine
    }

    /// Get a specific engine by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ReasoningEngine>> {
        self.engines.get(name).cloned()
    }

    /// List all registered engine names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.engines.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build engines from configuration.
///
/// Every `[providers.<name>]` entry becomes an engine, and the default
/// provider is always present. With `fallback_providers` set, the default
/// becomes a [`FallbackEngine`] over the default followed by the fallbacks.
pub fn build_from_config(config: &AppConfig) -> EngineRouter {
    let mut router = EngineRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        router.register(name.clone(), build_engine(config, name, provider_config));
    }

    // Ensure every referenced engine exists (even if not explicitly configured)
    let referenced = std::iter::once(&config.default_provider).chain(&config.fallback_providers);
    for name in referenced {
        if router.get(name).is_none() {
            let engine = build_engine(config, name, &ProviderConfig::default());
            router.register(name.clone(), engine);
        }
    }

    if !config.fallback_providers.is_empty() {
        let mut chain = FallbackEngine::new(format!("{}+fallback", config.default_provider));
        for name in std::iter::once(&config.default_provider).chain(&config.fallback_providers) {
            if let Some(engine) = router.get(name) {
                chain = chain.add(engine, timeout_for(config, name));
            }
        }
        debug!(engines = ?chain.engine_names(), "Built fallback engine chain");
        let chain_name = chain.name().to_string();
        router.register(chain_name.clone(), Arc::new(chain));
        router.default_engine = chain_name;
    }

    router
}

fn build_engine(
    config: &AppConfig,
    name: &str,
    provider_config: &ProviderConfig,
) -> Arc<dyn ReasoningEngine> {
    let api_key = provider_config
        .api_key
        .clone()
        .or_else(|| config.api_key.clone())
        .unwrap_or_default();

    let base_url = provider_config
        .api_url
        .clone()
        .unwrap_or_else(|| default_base_url(name));

    Arc::new(OpenAiCompatEngine::with_timeout(
        name,
        base_url,
        api_key,
        timeout_for(config, name),
    ))
}

fn timeout_for(config: &AppConfig, name: &str) -> Duration {
    let secs = config
        .providers
        .get(name)
        .and_then(|p| p.timeout_secs)
        .unwrap_or(120);
    Duration::from_secs(secs)
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
