//! Model boundary types
//!
//! These are NOT storage types - `ThreadEvent` wraps them with bookkeeping
//! (id, tid, seq, timestamp, metadata) once they are appended to a thread.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::observe::SpanContext;
use crate::tool::{ToolCall, ToolResult};

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Content part of a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    /// Opaque structured payload (files, provider-specific blocks)
    Data { data: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Vec<MessagePart>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        let text = text.into();
        let content = if text.is_empty() {
            Vec::new()
        } else {
            vec![MessagePart::Text { text }]
        };
        Self { role, content }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::Data { .. } => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reasoning {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// A durable conversation item, as exchanged with the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ModelItem {
    Message(Message),
    Reasoning(Reasoning),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

impl From<Message> for ModelItem {
    fn from(message: Message) -> Self {
        ModelItem::Message(message)
    }
}

impl From<ToolCall> for ModelItem {
    fn from(call: ToolCall) -> Self {
        ModelItem::ToolCall(call)
    }
}

impl From<ToolResult> for ModelItem {
    fn from(result: ToolResult) -> Self {
        ModelItem::ToolResult(result)
    }
}

/// Finish reasons for model generation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other(String),
}

/// Token usage reported by the model
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// One item of a model response stream.
///
/// Complete items (`message`, `reasoning`, `tool-call`, `tool-result`) are
/// durable. Start/delta/end markers are ephemeral: forwarded to the caller,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StreamItem {
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        text: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        text: String,
    },
    ReasoningEnd {
        id: String,
    },
    Message(Message),
    Reasoning(Reasoning),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    Finish {
        finish_reason: FinishReason,
        #[serde(default)]
        usage: Usage,
    },
    Error {
        error: String,
    },
}

impl StreamItem {
    /// Split off the durable part of the stream. Returns the item back when
    /// it is a delta, marker, finish, or error.
    pub fn into_model_item(self) -> Result<ModelItem, StreamItem> {
        match self {
            StreamItem::Message(m) => Ok(ModelItem::Message(m)),
            StreamItem::Reasoning(r) => Ok(ModelItem::Reasoning(r)),
            StreamItem::ToolCall(c) => Ok(ModelItem::ToolCall(c)),
            StreamItem::ToolResult(r) => Ok(ModelItem::ToolResult(r)),
            other => Err(other),
        }
    }
}

impl From<ModelItem> for StreamItem {
    fn from(item: ModelItem) -> Self {
        match item {
            ModelItem::Message(m) => StreamItem::Message(m),
            ModelItem::Reasoning(r) => StreamItem::Reasoning(r),
            ModelItem::ToolCall(c) => StreamItem::ToolCall(c),
            ModelItem::ToolResult(r) => StreamItem::ToolResult(r),
        }
    }
}

/// Sampling settings forwarded verbatim to the provider
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Provider-specific extras
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

/// Tool description handed to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    Function {
        name: String,
        description: String,
        input_schema: Value,
    },
    /// Executed server-side by the provider
    Hosted {
        id: String,
        name: String,
        #[serde(default)]
        args: Value,
    },
}

impl ToolDefinition {
    pub fn name(&self) -> &str {
        match self {
            ToolDefinition::Function { name, .. } | ToolDefinition::Hosted { name, .. } => name,
        }
    }
}

/// Structured output hint for providers that support constrained decoding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonSchema {
        name: String,
        schema: Value,
        strict: bool,
    },
}

/// A single model call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRequest {
    pub input: Vec<ModelItem>,
    #[serde(default)]
    pub settings: ModelSettings,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<ResponseFormat>,
    /// Parent span for provider-side tracing; never sent over the wire
    #[serde(skip)]
    pub span: Option<SpanContext>,
}

/// Batch (non-streaming) model response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: Vec<ModelItem>,
    #[serde(default)]
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub usage: Usage,
}

impl ModelResponse {
    /// Re-expose a batch response as the items of a one-shot stream.
    pub fn into_stream_items(self) -> Vec<StreamItem> {
        let mut items: Vec<StreamItem> = self.content.into_iter().map(Into::into).collect();
        items.push(StreamItem::Finish {
            finish_reason: self.finish_reason,
            usage: self.usage,
        });
        items
    }
}
