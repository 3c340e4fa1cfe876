//! Helpers for capabilities that consult the reasoning engine themselves.
//!
//! Engine output is free text; when a capability needs structured data it
//! takes the first balanced JSON object found in that text, so surrounding
//! prose and ```json fences are tolerated.

use std::sync::Arc;

use datarouter_core::engine::{EngineRequest, ReasoningEngine};
use datarouter_core::error::CapabilityError;
use datarouter_core::message::Message;
use serde_json::Value;
use tracing::debug;

/// A sub-call to the reasoning engine made from inside a capability.
///
/// No capabilities are offered to the engine on these calls, so the
/// response is plain text.
#[derive(Clone)]
pub struct EnginePrompt {
    engine: Arc<dyn ReasoningEngine>,
    model: String,
    temperature: f32,
}

impl EnginePrompt {
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            engine,
            model: model.into(),
            temperature,
        }
    }

    /// Ask the engine and return its text, failing the calling capability
    /// on engine errors or an empty answer.
    pub async fn ask(
        &self,
        capability: &str,
        system: &str,
        user: String,
    ) -> Result<String, CapabilityError> {
        let mut request =
            EngineRequest::new(&self.model, vec![Message::system(system), Message::user(user)]);
        request.temperature = self.temperature;

        let response = self.engine.complete(request).await.map_err(|e| {
            CapabilityError::execution(capability, format!("engine call failed: {e}"))
        })?;

        if !response.requests.is_empty() {
            let names: Vec<&str> = response
                .requests
                .iter()
                .map(|r| r.name.as_str())
                .collect();
            debug!(capability, ?names, "Ignoring capability requests in sub-call");
        }

        let text = response.text().trim();
        if text.is_empty() {
            return Err(CapabilityError::execution(capability, "engine returned no text"));
        }
        Ok(text.to_string())
    }
}

/// Find the first balanced JSON object in `text` that parses.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut start = 0;

    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(bytes, open) {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str(&text[open..=close]) {
                return Some(value);
            }
        }
        start = open + 1;
    }
    None
}

/// Index of the `}` closing the `{` at `open`, skipping string contents.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
