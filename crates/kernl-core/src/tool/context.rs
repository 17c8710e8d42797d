//! Execution context handed to tools and instruction generators
//!
//! `Context` is caller-owned data plus the approval map. The engine only
//! writes to it when recording approval decisions.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::engine;
use crate::observe::SpanContext;

/// Outcome of an out-of-band approval for a single tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Denied {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Caller-supplied data plus the approval map, keyed by call id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub approvals: HashMap<String, ApprovalDecision>,
}

impl Context {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            approvals: HashMap::new(),
        }
    }

    /// Look up a top-level key of `data`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Set a top-level key of `data`, turning `data` into an object if needed
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        if !self.data.is_object() {
            self.data = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(map) = &mut self.data {
            map.insert(key.into(), value);
        }
    }

    pub fn approval(&self, call_id: &str) -> Option<&ApprovalDecision> {
        self.approvals.get(call_id)
    }

    pub fn is_approved(&self, call_id: &str) -> bool {
        matches!(self.approval(call_id), Some(ApprovalDecision::Approved))
    }

    pub fn approve(&mut self, call_id: impl Into<String>) {
        self.approvals
            .insert(call_id.into(), ApprovalDecision::Approved);
    }

    pub fn deny(&mut self, call_id: impl Into<String>, reason: Option<String>) {
        self.approvals
            .insert(call_id.into(), ApprovalDecision::Denied { reason });
    }
}

/// Per-invocation context for a tool body
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tid: String,
    pub namespace: String,
    /// Call id of the intention being executed, when invoked by the engine
    pub call_id: Option<String>,
    /// Snapshot of the thread context at fan-out time
    pub context: Context,
    pub span: SpanContext,
    /// Upper bound for the tool body
    pub timeout: Duration,
}

impl ToolContext {
    pub fn new(context: Context) -> Self {
        Self {
            tid: String::new(),
            namespace: String::new(),
            call_id: None,
            context,
            span: SpanContext::root(),
            timeout: Duration::from_secs(engine::TOOL_TIMEOUT_SECS),
        }
    }

    pub fn with_thread(mut self, tid: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.tid = tid.into();
        self.namespace = namespace.into();
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn with_span(mut self, span: SpanContext) -> Self {
        self.span = span;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
