//! ReasoningEngine trait — the abstraction over the model that drives the loop.
//!
//! An engine receives the conversation so far plus the capabilities it may
//! request, and answers with optional text and zero or more capability
//! requests. Implementations: OpenAI-compatible endpoints, fallback chains,
//! scripted stubs in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityRequest, CapabilitySpec};
use crate::error::EngineError;
use crate::message::Message;

/// One call to the reasoning engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The full conversation snapshot
    pub messages: Vec<Message>,

    /// Capabilities the engine may request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<CapabilitySpec>,

    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.1
}

impl EngineRequest {
    /// A request with default sampling settings.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            capabilities: Vec::new(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<CapabilitySpec>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// What the engine decided this turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    /// Answer or commentary text; `None` when the engine produced none
    #[serde(default)]
    pub text: Option<String>,

    /// Capability requests, in the order the engine emitted them
    #[serde(default)]
    pub requests: Vec<CapabilityRequest>,

    /// Token usage statistics
    #[serde(default)]
    pub usage: Option<Usage>,

    /// Which model actually responded
    #[serde(default)]
    pub model: String,
}

impl EngineResponse {
    /// A plain answer with no capability requests.
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            requests: Vec::new(),
            usage: None,
            model: String::new(),
        }
    }

    /// A turn that requests capabilities.
    pub fn requesting(requests: Vec<CapabilityRequest>) -> Self {
        Self {
            text: None,
            requests,
            usage: None,
            model: String::new(),
        }
    }

    /// The response text, empty when the engine produced none.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    /// Whether this response ends the interaction.
    pub fn is_final(&self) -> bool {
        self.requests.is_empty()
    }

    /// The assistant message recording this response verbatim.
    pub fn to_message(&self) -> Message {
        Message::assistant_with_requests(self.text(), self.requests.clone())
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core ReasoningEngine trait.
///
/// The orchestrator calls `complete()` without knowing which backend is in
/// use. Engines never retry on the orchestrator's behalf unless they are
/// explicitly built to (see the fallback chain in `datarouter-providers`).
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// A human-readable name for this engine (e.g., "openai", "fallback").
    fn name(&self) -> &str;

    /// Send a request and get the engine's decision for this turn.
    async fn complete(&self, request: EngineRequest) -> Result<EngineResponse, EngineError>;

    /// Health check — can we reach the engine?
    async fn health_check(&self) -> Result<bool, EngineError> {
        Ok(true)
    }
}
