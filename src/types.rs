// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model-facing types.
//!
//! The transcript, tool schemas and the [`Provider`] abstraction the agent loop
//! talks to. Wire formats live in the provider implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ProviderError;

// ============================================================================
// Message Types
// ============================================================================

/// Role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Type of content block within a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentBlockType {
    Text,
    ToolUse,
    ToolResult,
}

/// A block of content within a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: ContentBlockType,

    /// Text content (for text blocks)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Call id for tool_use blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Tool name for tool_use blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Arguments for tool_use blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,

    /// Paired call id for tool_result blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,

    /// Serialized output for tool_result blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ContentBlock {
    fn empty(block_type: ContentBlockType) -> Self {
        Self {
            block_type,
            text: None,
            id: None,
            name: None,
            input: None,
            tool_use_id: None,
            content: None,
            is_error: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::empty(ContentBlockType::Text)
        }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            input: Some(input),
            ..Self::empty(ContentBlockType::ToolUse)
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            tool_use_id: Some(tool_use_id.into()),
            content: Some(content.into()),
            is_error: is_error.then_some(true),
            ..Self::empty(ContentBlockType::ToolResult)
        }
    }
}

/// Message content - either a simple string or structured content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A message in the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn with_blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// A single tool output, paired to its call by id.
    pub fn tool_output(call_id: impl Into<String>, output: impl Into<String>, is_error: bool) -> Self {
        Self::with_blocks(
            Role::User,
            vec![ContentBlock::tool_result(call_id, output, is_error)],
        )
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(s) => Some(s),
            MessageContent::Blocks(_) => None,
        }
    }

    pub fn as_blocks(&self) -> Option<&[ContentBlock]> {
        match &self.content {
            MessageContent::Text(_) => None,
            MessageContent::Blocks(blocks) => Some(blocks),
        }
    }
}

// ============================================================================
// Tool Definitions
// ============================================================================

/// JSON Schema for tool input parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: None,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, schema: serde_json::Value) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn with_required(mut self, required: &[&str]) -> Self {
        self.required = Some(required.iter().map(|s| s.to_string()).collect());
        self
    }
}

impl Default for InputSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// Definition of a tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: InputSchema::new(),
        }
    }

    pub fn with_schema(mut self, schema: InputSchema) -> Self {
        self.input_schema = schema;
        self
    }
}

/// A tool call emitted by the model.
///
/// `id` may be empty or contain characters the transport rejects; the agent
/// loop normalizes it before echoing it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

// ============================================================================
// Token Usage & Provider Response
// ============================================================================

/// Token usage reported for one model round-trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Prompt tokens served from the provider's cache.
    #[serde(default)]
    pub cached_input_tokens: u64,
    /// Provider-reported total; falls back to input + output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Provider-reported cost in USD, when the endpoint returns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.total_tokens
            .unwrap_or(self.input_tokens + self.output_tokens)
    }

    /// Add another response's usage onto this running total.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        let total = self.total() + other.total();
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_input_tokens += other.cached_input_tokens;
        self.total_tokens = Some(total);
        self.cost = match (self.cost, other.cost) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
        };
    }
}

/// Reason why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// Response from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Assistant text (the final summary when there are no tool calls)
    pub content: String,
    /// Tool calls in the order the model emitted them
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ProviderResponse {
    /// A final text response with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: None,
        }
    }

    /// A response requesting tool calls.
    pub fn with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: String::new(),
            tool_calls,
            stop_reason: StopReason::ToolUse,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ============================================================================
// Provider Traits
// ============================================================================

/// A model inference endpoint.
///
/// One request carries the whole transcript (system message first) plus the
/// tool schema; the response carries usage and the ordered output items.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ProviderResponse, ProviderError>;

    /// Name of this provider for logs.
    fn name(&self) -> &str;

    /// Model identifier requests are sent to.
    fn model(&self) -> &str;
}

/// A boxed provider for dynamic dispatch.
pub type BoxedProvider = Box<dyn Provider>;

/// Builds a provider for the model a job resolved to.
///
/// Returns [`ProviderError::NotConfigured`] when credentials are missing, which
/// fails the job.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, model: &str) -> Result<BoxedProvider, ProviderError>;
}

/// Arc-wrapped factory shared by every job task.
pub type SharedProviderFactory = Arc<dyn ProviderFactory>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = Message::system("You are in a sandbox");
        assert_eq!(msg.role, Role::System);
        assert_eq!(msg.as_text(), Some("You are in a sandbox"));
        assert!(msg.as_blocks().is_none());
    }

    #[test]
    fn test_tool_output_message() {
        let msg = Message::tool_output("call_1", r#"{"error":"nope"}"#, true);
        let blocks = msg.as_blocks().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block_type, ContentBlockType::ToolResult);
        assert_eq!(blocks[0].tool_use_id.as_deref(), Some("call_1"));
        assert_eq!(blocks[0].is_error, Some(true));
    }

    #[test]
    fn test_tool_definition_schema() {
        let tool = ToolDefinition::new("read_file", "Read a UTF-8 file").with_schema(
            InputSchema::new()
                .with_property("path", json!({"type": "string"}))
                .with_required(&["path"]),
        );
        let value = serde_json::to_value(&tool.input_schema).unwrap();
        assert_eq!(value["type"], "object");
        assert_eq!(value["required"], json!(["path"]));
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
            ..Default::default()
        };
        assert_eq!(usage.total(), 150);

        let reported = TokenUsage {
            total_tokens: Some(175),
            ..usage
        };
        assert_eq!(reported.total(), 175);
    }

    #[test]
    fn test_token_usage_accumulate() {
        let mut total = TokenUsage::default();
        total.accumulate(&TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            cached_input_tokens: 40,
            total_tokens: Some(120),
            cost: None,
        });
        total.accumulate(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            cost: Some(0.25),
            ..Default::default()
        });
        assert_eq!(total.input_tokens, 110);
        assert_eq!(total.output_tokens, 25);
        assert_eq!(total.cached_input_tokens, 40);
        assert_eq!(total.total(), 135);
        assert_eq!(total.cost, Some(0.25));
    }

    #[test]
    fn test_provider_response_constructors() {
        let response = ProviderResponse::text("done");
        assert!(!response.has_tool_calls());
        assert_eq!(response.stop_reason, StopReason::EndTurn);

        let response = ProviderResponse::with_tool_calls(vec![ToolCall {
            id: "a".into(),
            name: "read_file".into(),
            input: json!({"path": "x"}),
        }]);
        assert!(response.has_tool_calls());
    }

    #[test]
    fn test_content_block_serialization() {
        let block = ContentBlock::tool_use("id1", "run_shell", json!({"command": ["ls"]}));
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"type\":\"tool_use\""));
        assert!(json.contains("\"name\":\"run_shell\""));
        assert!(!json.contains("is_error"));
    }
}
