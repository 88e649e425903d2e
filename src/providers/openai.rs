// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OpenAI-compatible chat completions provider.
//!
//! One non-streaming `POST {base_url}/chat/completions` per agent iteration.
//! Tool outputs go back as `role: "tool"` messages, one per call id.
//!
//! See [OpenAI Chat Completions API](https://platform.openai.com/docs/api-reference/chat)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[cfg(feature = "telemetry")]
use tracing::debug;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use crate::error::ProviderError;
use crate::types::{
    ContentBlockType, Message, MessageContent, Provider, ProviderResponse, Role, StopReason,
    TokenUsage, ToolCall, ToolDefinition,
};

/// OpenAI-compatible provider bound to one model.
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    provider_name: String,
}

impl OpenAIProvider {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NetworkError(format!("failed to build HTTP client: {e}")))?;

        let base_url: String = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        let provider_name = Self::detect_provider_name(&base_url);

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url,
            provider_name,
        })
    }

    fn detect_provider_name(base_url: &str) -> String {
        if base_url.contains("openai.com") {
            "OpenAI".to_string()
        } else if base_url.contains("azure") {
            "Azure OpenAI".to_string()
        } else if base_url.contains("openrouter") {
            "OpenRouter".to_string()
        } else {
            "OpenAI-Compatible".to_string()
        }
    }

    fn build_request(&self, messages: &[Message], tools: &[ToolDefinition]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: messages.iter().map(ChatMessage::from).collect(),
            tools: (!tools.is_empty()).then(|| tools.iter().map(ChatTool::from).collect()),
        }
    }

    /// Map an error response to a [`ProviderError`].
    fn handle_error_response(&self, status_code: u16, body: &str) -> ProviderError {
        let parsed = serde_json::from_str::<ApiError>(body).ok();
        let message = parsed
            .as_ref()
            .map(|e| e.error.message.clone())
            .unwrap_or_else(|| body.to_string());
        let error_type = parsed.and_then(|e| e.error.error_type.or(e.error.code));

        match (error_type.as_deref(), status_code) {
            (Some("authentication_error") | Some("invalid_api_key"), _) | (_, 401) => {
                ProviderError::AuthError(message)
            }
            (Some("rate_limit_error") | Some("rate_limit_exceeded"), _) | (_, 429) => {
                ProviderError::RateLimited(message)
            }
            (Some("model_not_found"), _) | (_, 404) => {
                ProviderError::ModelNotFound(format!("{}: {message}", self.model))
            }
            _ => ProviderError::api(message, status_code),
        }
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ProviderResponse, ProviderError> {
        let request = self.build_request(messages, tools);
        let start = Instant::now();

        #[cfg(feature = "telemetry")]
        debug!(model = %self.model, messages = messages.len(), "Sending chat request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            #[cfg(feature = "telemetry")]
            GLOBAL_METRICS.record_operation("provider.chat", start.elapsed());
            return Err(self.handle_error_response(status.as_u16(), &error_text));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let provider_response = ProviderResponse::try_from(api_response)?;

        #[cfg(feature = "telemetry")]
        {
            GLOBAL_METRICS.record_operation("provider.chat", start.elapsed());
            if let Some(ref usage) = provider_response.usage {
                GLOBAL_METRICS.record_tokens(
                    usage.input_tokens,
                    usage.cached_input_tokens,
                    usage.output_tokens,
                );
            }
        }
        #[cfg(not(feature = "telemetry"))]
        let _ = start;

        Ok(provider_response)
    }

    fn name(&self) -> &str {
        &self.provider_name
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<ChatContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

/// Content can be a string or array of parts.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ChatContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    call_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function: Option<ChatFunction>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatToolFunction,
}

#[derive(Debug, Serialize)]
struct ChatToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
    /// Reported by some OpenAI-compatible gateways.
    #[serde(default)]
    cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

// ============================================================================
// Type Conversions
// ============================================================================

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        let blocks = match &msg.content {
            MessageContent::Text(s) => {
                return Self {
                    role: role.to_string(),
                    content: Some(ChatContent::Text(s.clone())),
                    tool_calls: None,
                    tool_call_id: None,
                }
            }
            MessageContent::Blocks(blocks) => blocks,
        };

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block.block_type {
                ContentBlockType::Text => {
                    if let Some(ref t) = block.text {
                        text.push_str(t);
                    }
                }
                ContentBlockType::ToolUse => tool_calls.push(ChatToolCall {
                    id: block.id.clone(),
                    call_type: Some("function".to_string()),
                    function: Some(ChatFunction {
                        name: block.name.clone(),
                        arguments: Some(
                            block
                                .input
                                .as_ref()
                                .map(|v| v.to_string())
                                .unwrap_or_else(|| "{}".to_string()),
                        ),
                    }),
                }),
                ContentBlockType::ToolResult => {
                    return Self {
                        role: "tool".to_string(),
                        content: Some(ChatContent::Text(block.content.clone().unwrap_or_default())),
                        tool_calls: None,
                        tool_call_id: block.tool_use_id.clone(),
                    };
                }
            }
        }

        Self {
            role: role.to_string(),
            content: (!text.is_empty()).then_some(ChatContent::Text(text)),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
        }
    }
}

impl From<&ToolDefinition> for ChatTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: ChatToolFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: serde_json::to_value(&tool.input_schema).unwrap_or_default(),
            },
        }
    }
}

impl From<ChatUsage> for TokenUsage {
    fn from(u: ChatUsage) -> Self {
        Self {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cached_input_tokens: u.prompt_tokens_details.map_or(0, |d| d.cached_tokens),
            total_tokens: u.total_tokens,
            cost: u.cost,
        }
    }
}

impl TryFrom<ChatResponse> for ProviderResponse {
    type Error = ProviderError;

    fn try_from(response: ChatResponse) -> Result<Self, Self::Error> {
        let usage = response.usage.map(TokenUsage::from);
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;

        let content = match choice.message.content {
            Some(ChatContent::Text(s)) => s,
            Some(ChatContent::Parts(parts)) => parts
                .into_iter()
                .filter_map(|p| match p {
                    ChatContentPart::Text { text } => Some(text),
                    ChatContentPart::Other => None,
                })
                .collect::<Vec<_>>()
                .join(""),
            None => String::new(),
        };

        // Calls without a name cannot be dispatched or answered; drop them.
        // A missing id is kept and normalized by the agent loop.
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| {
                let func = tc.function?;
                let name = func.name?;
                let input = match func.arguments {
                    None => serde_json::Value::Object(Default::default()),
                    Some(raw) if raw.trim().is_empty() => serde_json::Value::Object(Default::default()),
                    Some(raw) => serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)),
                };
                Some(ToolCall {
                    id: tc.id.unwrap_or_default(),
                    name,
                    input,
                })
            })
            .collect::<Vec<_>>();

        let stop_reason = match choice.finish_reason.as_deref() {
            Some("tool_calls") => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            _ if !tool_calls.is_empty() => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        };

        Ok(Self {
            content,
            tool_calls,
            stop_reason,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentBlock;
    use serde_json::json;

    fn provider() -> OpenAIProvider {
        OpenAIProvider::new("sk-test", "gpt-4.1-mini", "https://api.openai.com/v1/", Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn test_provider_creation() {
        let provider = provider();
        assert_eq!(provider.name(), "OpenAI");
        assert_eq!(provider.model(), "gpt-4.1-mini");
        assert_eq!(provider.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_provider_name_detection() {
        assert_eq!(OpenAIProvider::detect_provider_name("https://api.openai.com/v1"), "OpenAI");
        assert_eq!(OpenAIProvider::detect_provider_name("https://x.openai.azure.com"), "Azure OpenAI");
        assert_eq!(OpenAIProvider::detect_provider_name("https://gateway.example.com"), "OpenAI-Compatible");
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![
            Message::system("sandbox"),
            Message::user("fix the build"),
            Message::with_blocks(
                Role::Assistant,
                vec![ContentBlock::tool_use("call_1", "read_file", json!({"path": "pom.xml"}))],
            ),
            Message::tool_output("call_1", r#"{"content":"<project/>"}"#, false),
        ];
        let tools = vec![ToolDefinition::new("read_file", "Read a file")];
        let request = serde_json::to_value(provider().build_request(&messages, &tools)).unwrap();

        assert_eq!(request["model"], "gpt-4.1-mini");
        assert_eq!(request["messages"][0]["role"], "system");
        assert_eq!(request["messages"][2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            request["messages"][2]["tool_calls"][0]["function"]["arguments"],
            r#"{"path":"pom.xml"}"#
        );
        assert!(request["messages"][2].get("content").is_none());
        assert_eq!(request["messages"][3]["role"], "tool");
        assert_eq!(request["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(request["tools"][0]["type"], "function");
        assert_eq!(request["tools"][0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_request_without_tools_omits_field() {
        let request =
            serde_json::to_value(provider().build_request(&[Message::user("hi")], &[])).unwrap();
        assert!(request.get("tools").is_none());
    }

    #[test]
    fn test_response_with_tool_calls_and_usage() {
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "call.1", "type": "function",
                         "function": {"name": "write_file", "arguments": "{\"path\":\"a\",\"content\":\"b\"}"}},
                        {"type": "function", "function": {"name": "run_shell", "arguments": "not json"}},
                        {"id": "x", "type": "function", "function": {"arguments": "{}"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {
                "prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150,
                "prompt_tokens_details": {"cached_tokens": 100}, "cost": 0.0012
            }
        });
        let response: ChatResponse = serde_json::from_value(raw).unwrap();
        let response = ProviderResponse::try_from(response).unwrap();

        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].id, "call.1");
        assert_eq!(response.tool_calls[0].input["path"], "a");
        assert_eq!(response.tool_calls[1].id, "");
        assert_eq!(response.tool_calls[1].input, json!("not json"));

        let usage = response.usage.unwrap();
        assert_eq!(usage.input_tokens, 120);
        assert_eq!(usage.cached_input_tokens, 100);
        assert_eq!(usage.total(), 150);
        assert_eq!(usage.cost, Some(0.0012));
    }

    #[test]
    fn test_response_final_text() {
        let raw = json!({
            "choices": [{"message": {"role": "assistant", "content": "All tests pass."}, "finish_reason": "stop"}]
        });
        let response: ChatResponse = serde_json::from_value(raw).unwrap();
        let response = ProviderResponse::try_from(response).unwrap();
        assert_eq!(response.content, "All tests pass.");
        assert!(!response.has_tool_calls());
        assert!(response.usage.is_none());
    }

    #[test]
    fn test_response_without_choices_is_parse_error() {
        let response: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            ProviderResponse::try_from(response),
            Err(ProviderError::ParseError(_))
        ));
    }

    #[test]
    fn test_error_mapping() {
        let p = provider();
        let body = r#"{"error": {"message": "Incorrect API key", "type": "invalid_request_error", "code": "invalid_api_key"}}"#;
        assert!(matches!(p.handle_error_response(401, body), ProviderError::AuthError(_)));
        assert!(matches!(
            p.handle_error_response(429, "slow down"),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            p.handle_error_response(404, r#"{"error": {"message": "no such model"}}"#),
            ProviderError::ModelNotFound(_)
        ));
        match p.handle_error_response(500, "boom") {
            ProviderError::ApiError { message, status_code } => {
                assert_eq!(message, "boom");
                assert_eq!(status_code, Some(500));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
