//! Shared test helpers for orchestrator tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use datarouter_core::capability::{
    Arguments, Capability, CapabilityRequest, CapabilitySpec, FieldKind, InputSchema,
};
use datarouter_core::engine::{EngineRequest, EngineResponse, ReasoningEngine, Usage};
use datarouter_core::error::{CapabilityError, EngineError};

/// A reasoning engine that replays scripted responses in sequence.
///
/// Panics if more calls are made than responses provided, unless it was
/// built with [`ScriptedEngine::looping`].
pub struct ScriptedEngine {
    responses: Mutex<VecDeque<Result<EngineResponse, EngineError>>>,
    looping: Option<String>,
    requests: Mutex<Vec<EngineRequest>>,
}

impl ScriptedEngine {
    pub fn new(responses: Vec<Result<EngineResponse, EngineError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            looping: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// An engine that returns responses in order, all successful.
    pub fn replies(responses: Vec<EngineResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    /// An engine that never converges: every turn requests `capability`.
    pub fn looping(capability: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            looping: Some(capability.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> EngineRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };

        if let Some(capability) = &self.looping {
            return Ok(requesting(vec![make_request(
                &format!("call_{call}"),
                capability,
                serde_json::json!({"n": call}),
            )]));
        }

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedEngine: no more responses (call #{call})"))
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

/// A plain answer with no capability requests.
pub fn answer(text: &str) -> EngineResponse {
    EngineResponse {
        usage: usage(),
        model: "scripted-model".into(),
        ..EngineResponse::answer(text)
    }
}

/// A turn that requests capabilities.
pub fn requesting(requests: Vec<CapabilityRequest>) -> EngineResponse {
    EngineResponse {
        usage: usage(),
        model: "scripted-model".into(),
        ..EngineResponse::requesting(requests)
    }
}

pub fn make_request(id: &str, name: &str, args: serde_json::Value) -> CapabilityRequest {
    CapabilityRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

/// Doubles an integer `n`.
pub struct Doubler;

#[async_trait]
impl Capability for Doubler {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            "double",
            "Doubles a number",
            InputSchema::new().required("n", FieldKind::Integer, "The number"),
        )
    }

    async fn execute(&self, arguments: Arguments) -> Result<String, CapabilityError> {
        Ok((arguments.i64("n").unwrap_or_default() * 2).to_string())
    }
}

/// Always fails during execution.
pub struct Broken;

#[async_trait]
impl Capability for Broken {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new("broken", "Always fails", InputSchema::new())
    }

    async fn execute(&self, _arguments: Arguments) -> Result<String, CapabilityError> {
        Err(CapabilityError::execution("broken", "backing store unavailable"))
    }
}
