//! OpenAI-compatible reasoning engine.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, Groq, and any
//! endpoint exposing `/v1/chat/completions` with function calling.
//!
//! Capabilities are offered as `tools`; capability requests come back as
//! `tool_calls`, and capability results are sent as `role: "tool"` messages.

use std::time::Duration;

use async_trait::async_trait;
use datarouter_core::capability::{CapabilityRequest, CapabilitySpec};
use datarouter_core::engine::{EngineRequest, EngineResponse, ReasoningEngine, Usage};
use datarouter_core::error::EngineError;
use datarouter_core::message::{Message, Role};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// An OpenAI-compatible reasoning engine.
pub struct OpenAiCompatEngine {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatEngine {
    /// Create a new engine with the default 120s request timeout.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self::with_timeout(name, base_url, api_key, Duration::from_secs(120))
    }

    /// Create a new engine with a custom request timeout.
    pub fn with_timeout(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to a default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI engine (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an OpenRouter engine (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an Ollama engine (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Convert conversation messages to the chat-completions format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let tool_calls = (!m.requests.is_empty()).then(|| {
                    m.requests
                        .iter()
                        .map(|r| ApiToolCall {
                            id: r.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: r.name.clone(),
                                arguments: r.arguments.clone(),
                            },
                        })
                        .collect()
                });

                // Assistant turns that only carry tool calls send null content
                let content = if m.role == Role::Assistant
                    && m.content.is_empty()
                    && tool_calls.is_some()
                {
                    None
                } else {
                    Some(m.content.clone())
                };

                ApiMessage {
                    role: match m.role {
                        Role::System => "system".into(),
                        Role::User => "user".into(),
                        Role::Assistant => "assistant".into(),
                        Role::CapabilityResult => "tool".into(),
                    },
                    content,
                    tool_calls,
                    tool_call_id: m.call_id.clone(),
                }
            })
            .collect()
    }

    /// Convert capability specs to tool definitions.
    fn to_api_tools(capabilities: &[CapabilitySpec]) -> Vec<ApiToolDefinition> {
        capabilities
            .iter()
            .map(|c| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: c.name.clone(),
                    description: c.description.clone(),
                    parameters: c.input.to_json_schema(),
                },
            })
            .collect()
    }

    fn build_body(request: &EngineRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.capabilities.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.capabilities));
        }

        body
    }

    fn into_engine_response(api_response: ApiResponse) -> Result<EngineResponse, EngineError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::MalformedResponse("No choices in response".into()))?;

        let requests = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| CapabilityRequest {
                // Some local servers leave the id out
                id: if tc.id.is_empty() {
                    format!("call_{}", Uuid::new_v4().simple())
                } else {
                    tc.id
                },
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(EngineResponse {
            text: choice.message.content,
            requests,
            usage: api_response.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            model: api_response.model,
        })
    }
}

#[async_trait]
impl ReasoningEngine for OpenAiCompatEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(&request);

        debug!(
            engine = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            capabilities = request.capabilities.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout(e.to_string())
                } else {
                    EngineError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(EngineError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(EngineError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Engine returned error");
            return Err(EngineError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| EngineError::MalformedResponse(format!("Failed to parse response: {e}")))?;

        Self::into_engine_response(api_response)
    }

    async fn health_check(&self) -> Result<bool, EngineError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use datarouter_core::capability::{FieldKind, InputSchema};
    use datarouter_core::message::Conversation;

    #[test]
    fn openrouter_constructor() {
        let engine = OpenAiCompatEngine::openrouter("sk-test");
        assert_eq!(engine.name(), "openrouter");
        assert!(engine.base_url.contains("openrouter.ai"));
    }

    #[test]
    fn ollama_constructor_trims_trailing_slash() {
        let engine = OpenAiCompatEngine::ollama(Some("http://gpu-box:11434/v1/"));
        assert_eq!(engine.name(), "ollama");
        assert_eq!(engine.base_url, "http://gpu-box:11434/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatEngine::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn message_conversion_with_requests() {
        let msg = Message::assistant_with_requests(
            "",
            vec![CapabilityRequest {
                id: "call_1".into(),
                name: "lookup_data".into(),
                arguments: r#"{"prompt":"nov"}"#.into(),
            }],
        );
        let api_msgs = OpenAiCompatEngine::to_api_messages(&[msg]);
        assert!(api_msgs[0].content.is_none());
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc.len(), 1);
        assert_eq!(tc[0].function.name, "lookup_data");
        assert_eq!(tc[0].r#type, "function");
    }

    #[test]
    fn message_conversion_capability_result() {
        let msg = Message::capability_result("call_1", "result data");
        let api_msgs = OpenAiCompatEngine::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(api_msgs[0].content.as_deref(), Some("result data"));
    }

    #[test]
    fn body_includes_tools_from_capability_specs() {
        let request = EngineRequest::new("gpt-4o-mini", vec![Message::user("hi")])
            .with_capabilities(vec![CapabilitySpec::new(
                "analyze_data",
                "Analyze data",
                InputSchema::new().required("data", FieldKind::String, "The data"),
            )]);
        let body = OpenAiCompatEngine::build_body(&request);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["tools"][0]["function"]["name"], "analyze_data");
        assert_eq!(
            body["tools"][0]["function"]["parameters"]["required"],
            serde_json::json!(["data"])
        );
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn body_omits_tools_when_none_offered() {
        let mut request = EngineRequest::new("m", vec![]);
        request.max_tokens = Some(256);
        let body = OpenAiCompatEngine::build_body(&request);
        assert!(body.get("tools").is_none());
        assert_eq!(body["max_tokens"], 256);
    }

    #[test]
    fn parse_tool_call_response() {
        let data = r#"{
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [
                {"id": "call_a", "type": "function", "function": {"name": "lookup_data", "arguments": "{\"prompt\":\"x\"}"}},
                {"id": "call_b", "type": "function", "function": {"name": "analyze_data", "arguments": "{}"}}
            ]}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let api: ApiResponse = serde_json::from_str(data).unwrap();
        let resp = OpenAiCompatEngine::into_engine_response(api).unwrap();
        assert!(resp.text.is_none());
        assert_eq!(resp.requests.len(), 2);
        assert_eq!(resp.requests[0].id, "call_a");
        assert_eq!(resp.requests[1].name, "analyze_data");
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn parse_plain_answer_response() {
        let data = r#"{"model": "m", "choices": [{"message": {"role": "assistant", "content": "Sales rose 4%."}}]}"#;
        let api: ApiResponse = serde_json::from_str(data).unwrap();
        let resp = OpenAiCompatEngine::into_engine_response(api).unwrap();
        assert_eq!(resp.text(), "Sales rose 4%.");
        assert!(resp.is_final());
        assert!(resp.usage.is_none());
    }

    #[test]
    fn missing_tool_call_ids_are_filled_in() {
        let data = r#"{
            "model": "llama3.2",
            "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [
                {"function": {"name": "lookup_data", "arguments": "{}"}},
                {"id": "", "type": "function", "function": {"name": "analyze_data", "arguments": "{}"}}
            ]}}]
        }"#;
        let api: ApiResponse = serde_json::from_str(data).unwrap();
        let resp = OpenAiCompatEngine::into_engine_response(api).unwrap();
        let ids: Vec<_> = resp.requests.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.iter().all(|id| id.starts_with("call_") && id.len() > 5));
        assert_ne!(ids[0], ids[1]);

        // The filled-in ids satisfy the conversation log
        let mut conversation = Conversation::new();
        conversation.append(resp.to_message()).unwrap();
        assert_eq!(conversation.pending_calls(), ids);
    }

    #[test]
    fn empty_choices_is_malformed() {
        let api: ApiResponse = serde_json::from_str(r#"{"model": "m", "choices": []}"#).unwrap();
        let err = OpenAiCompatEngine::into_engine_response(api).unwrap_err();
        assert!(matches!(err, EngineError::MalformedResponse(_)));
    }
}
