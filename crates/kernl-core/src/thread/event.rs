//! Thread events: the append-only log entries
//!
//! An event is a model item (or a system note) plus bookkeeping assigned at
//! append time. Bookkeeping is stripped again before anything is sent to
//! the model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Message, ModelItem, Reasoning};
use crate::tool::{ToolCall, ToolResult};

/// Runtime note recorded in the log but never sent to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventData {
    Message(Message),
    Reasoning(Reasoning),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    System(SystemEvent),
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::Message(_) => EventKind::Message,
            EventData::Reasoning(_) => EventKind::Reasoning,
            EventData::ToolCall(_) => EventKind::ToolCall,
            EventData::ToolResult(_) => EventKind::ToolResult,
            EventData::System(_) => EventKind::System,
        }
    }
}

impl From<ModelItem> for EventData {
    fn from(item: ModelItem) -> Self {
        match item {
            ModelItem::Message(m) => EventData::Message(m),
            ModelItem::Reasoning(r) => EventData::Reasoning(r),
            ModelItem::ToolCall(c) => EventData::ToolCall(c),
            ModelItem::ToolResult(r) => EventData::ToolResult(r),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Message,
    Reasoning,
    ToolCall,
    ToolResult,
    System,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Reasoning => "reasoning",
            EventKind::ToolCall => "tool-call",
            EventKind::ToolResult => "tool-result",
            EventKind::System => "system",
        }
    }
}

/// Immutable log entry. `seq` is gap-free per thread and starts at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEvent {
    pub id: String,
    pub tid: String,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub data: EventData,
}

impl ThreadEvent {
    pub fn new(tid: impl Into<String>, seq: u64, data: impl Into<EventData>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tid: tid.into(),
            seq,
            timestamp: Utc::now(),
            metadata: Map::new(),
            data: data.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }

    /// The model-facing item, without bookkeeping. System events have none.
    pub fn to_model_item(&self) -> Option<ModelItem> {
        match &self.data {
            EventData::Message(m) => Some(ModelItem::Message(m.clone())),
            EventData::Reasoning(r) => Some(ModelItem::Reasoning(r.clone())),
            EventData::ToolCall(c) => Some(ModelItem::ToolCall(c.clone())),
            EventData::ToolResult(r) => Some(ModelItem::ToolResult(r.clone())),
            EventData::System(_) => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match &self.data {
            EventData::ToolCall(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match &self.data {
            EventData::ToolResult(result) => Some(result),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match &self.data {
            EventData::Message(message) => Some(message),
            _ => None,
        }
    }
}
