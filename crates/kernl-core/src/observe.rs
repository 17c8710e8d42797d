//! Observability side-channel
//!
//! Lifecycle events are handed to an injected `ThreadObserver`. Delivery is
//! fire-and-forget: observers cannot fail an execution, and a panicking
//! observer is swallowed.
//!
//! Span parentage is explicit: a `SpanContext` is passed down from the
//! execution to each tick, model call and tool call instead of living in
//! task-local state.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::ToolCallState;

/// Trace/span identity for one unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
}

impl SpanContext {
    /// Start a new trace
    pub fn root() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().simple().to_string(),
            span_id: new_span_id(),
            parent_span_id: None,
        }
    }

    /// Derive a child span in the same trace
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            parent_span_id: Some(self.span_id.clone()),
        }
    }
}

fn new_span_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..16].to_string()
}

/// Events emitted per execution. Exactly one `ThreadStart` and one
/// `ThreadStop` are emitted per `stream()`/`execute()` call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObservedEvent {
    #[serde(rename = "thread.start")]
    ThreadStart {
        tid: String,
        agent_id: String,
        namespace: String,
        span: SpanContext,
    },
    #[serde(rename = "tick.start")]
    TickStart {
        tid: String,
        tick: u32,
        span: SpanContext,
    },
    #[serde(rename = "tool.call")]
    ToolCall {
        tid: String,
        call_id: String,
        tool_id: String,
        state: ToolCallState,
        span: SpanContext,
    },
    #[serde(rename = "thread.stop")]
    ThreadStop {
        tid: String,
        tick: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        span: SpanContext,
    },
}

impl ObservedEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ObservedEvent::ThreadStart { .. } => "thread.start",
            ObservedEvent::TickStart { .. } => "tick.start",
            ObservedEvent::ToolCall { .. } => "tool.call",
            ObservedEvent::ThreadStop { .. } => "thread.stop",
        }
    }
}

pub trait ThreadObserver: Send + Sync {
    fn on_event(&self, event: &ObservedEvent);
}

/// Deliver an event without letting the observer affect control flow.
pub(crate) fn notify(observer: &dyn ThreadObserver, event: ObservedEvent) {
    if catch_unwind(AssertUnwindSafe(|| observer.on_event(&event))).is_err() {
        tracing::warn!(event = event.name(), "Observer panicked; event dropped");
    }
}

/// Logs lifecycle events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ThreadObserver for TracingObserver {
    fn on_event(&self, event: &ObservedEvent) {
        match event {
            ObservedEvent::ThreadStart {
                tid,
                agent_id,
                namespace,
                span,
            } => tracing::info!(
                tid = %tid,
                agent = %agent_id,
                namespace = %namespace,
                trace_id = %span.trace_id,
                "thread.start"
            ),
            ObservedEvent::TickStart { tid, tick, .. } => {
                tracing::debug!(tid = %tid, tick, "tick.start")
            }
            ObservedEvent::ToolCall {
                tid,
                call_id,
                tool_id,
                state,
                ..
            } => tracing::debug!(
                tid = %tid,
                call_id = %call_id,
                tool = %tool_id,
                state = ?state,
                "tool.call"
            ),
            ObservedEvent::ThreadStop {
                tid, tick, error, ..
            } => match error {
                Some(error) => tracing::warn!(tid = %tid, tick, error = %error, "thread.stop"),
                None => tracing::info!(tid = %tid, tick, "thread.stop"),
            },
        }
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ThreadObserver for NoopObserver {
    fn on_event(&self, _event: &ObservedEvent) {}
}
