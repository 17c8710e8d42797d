//! Caller-facing execution stream and results
//!
//! The tick loop is a producer writing `ThreadStreamEvent`s onto a bounded
//! channel. The stream ends when the channel closes; the typed result is
//! available from `ThreadStream::result`.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures::{Stream, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use super::event::ThreadEvent;
use crate::error::{KernlError, Result};
use crate::model::{FinishReason, StreamItem, Usage};
use crate::tool::ToolCall;

/// How an execution ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ThreadOutcome {
    /// A terminal tick produced a validated response
    Completed { value: Value },
    /// Tool calls are waiting for approval
    Interrupted { pending: Vec<ToolCall> },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadResult {
    pub tid: String,
    pub tick: u32,
    pub outcome: ThreadOutcome,
}

impl ThreadResult {
    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            ThreadOutcome::Completed { value } => Some(value),
            _ => None,
        }
    }

    /// Final text for plain-text agents
    pub fn text(&self) -> Option<&str> {
        self.value().and_then(Value::as_str)
    }

    pub fn pending(&self) -> &[ToolCall] {
        match &self.outcome {
            ThreadOutcome::Interrupted { pending } => pending,
            _ => &[],
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, ThreadOutcome::Completed { .. })
    }

    /// Deserialize the validated response into a caller type. `None` when the
    /// execution did not complete.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.value() {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| KernlError::ModelBehavior(format!("cannot decode response: {}", e))),
            None => Ok(None),
        }
    }
}

/// Items delivered on the execution stream
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadStreamEvent {
    /// Ephemeral model output (text/reasoning start, delta, end). Never persisted.
    Delta { item: StreamItem },
    /// An event appended to the log
    Event { event: ThreadEvent },
    /// The model finished its response for this tick
    ModelFinish {
        tick: u32,
        finish_reason: FinishReason,
        usage: Usage,
    },
    /// Tool calls were withheld and need a decision
    ApprovalRequired { calls: Vec<ToolCall> },
    Done { result: ThreadResult },
    Error { error: String },
}

pub struct ThreadStream {
    events: ReceiverStream<ThreadStreamEvent>,
    handle: JoinHandle<Result<ThreadResult>>,
}

impl ThreadStream {
    pub(crate) fn new(rx: mpsc::Receiver<ThreadStreamEvent>, handle: JoinHandle<Result<ThreadResult>>) -> Self {
        Self {
            events: ReceiverStream::new(rx),
            handle,
        }
    }

    /// Drain the remaining events and wait for the execution to finish.
    pub async fn result(mut self) -> Result<ThreadResult> {
        while self.events.next().await.is_some() {}
        self.handle
            .await
            .map_err(|e| KernlError::TaskFailed(e.to_string()))?
    }
}

impl std::fmt::Debug for ThreadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadStream")
            .field("finished", &self.handle.is_finished())
            .finish_non_exhaustive()
    }
}

impl Stream for ThreadStream {
    type Item = ThreadStreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}
