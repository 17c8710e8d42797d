//! Shared fixtures for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;

use crate::model::{
    FinishReason, LanguageModel, Message, ModelRequest, ModelResponse, ModelStream, StreamItem,
    Usage,
};
use crate::observe::{ObservedEvent, ThreadObserver};
use crate::storage::{
    GetOptions, HistoryOptions, InMemoryThreadStore, ListOptions, NewThread, StoreError,
    ThreadRecord, ThreadSnapshot, ThreadStore, ThreadUpdate,
};
use crate::thread::ThreadEvent;
use crate::tool::{FunctionTool, Tool, ToolCall, ToolContext};

/// Streams pre-scripted turns, one per model call.
pub(crate) struct ScriptedModel {
    turns: Mutex<VecDeque<Vec<StreamItem>>>,
    requests: Mutex<Vec<ModelRequest>>,
    hang_when_done: bool,
}

impl ScriptedModel {
    pub fn new(turns: Vec<Vec<StreamItem>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            hang_when_done: false,
        }
    }

    /// Once the script runs out, open streams that never yield.
    pub fn then_hang(mut self) -> Self {
        self.hang_when_done = true;
        self
    }

    pub fn text_turn(text: &str) -> Vec<StreamItem> {
        vec![
            StreamItem::TextStart { id: "txt".into() },
            StreamItem::TextDelta {
                id: "txt".into(),
                text: text.into(),
            },
            StreamItem::TextEnd { id: "txt".into() },
            StreamItem::Message(Message::assistant(text)),
            finish(FinishReason::Stop),
        ]
    }

    pub fn tool_turn(calls: Vec<ToolCall>) -> Vec<StreamItem> {
        let mut items: Vec<StreamItem> = calls.into_iter().map(StreamItem::ToolCall).collect();
        items.push(finish(FinishReason::ToolCalls));
        items
    }

    pub fn empty_turn() -> Vec<StreamItem> {
        vec![finish(FinishReason::Stop)]
    }

    /// Model calls made so far
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }
}

fn finish(finish_reason: FinishReason) -> StreamItem {
    StreamItem::Finish {
        finish_reason,
        usage: Usage::default(),
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn provider(&self) -> &str {
        "test"
    }

    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _request: ModelRequest) -> anyhow::Result<ModelResponse> {
        anyhow::bail!("scripted model only streams")
    }

    async fn stream(&self, request: ModelRequest) -> anyhow::Result<ModelStream> {
        self.requests.lock().push(request);
        let turn = self.turns.lock().pop_front();
        match turn {
            Some(items) => Ok(stream::iter(items).boxed()),
            None if self.hang_when_done => Ok(stream::pending::<StreamItem>().boxed()),
            None => anyhow::bail!("script exhausted"),
        }
    }
}

/// Batch-only model; relies on the default `stream` adapter.
pub(crate) struct BatchModel {
    responses: Mutex<VecDeque<ModelResponse>>,
}

impl BatchModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl LanguageModel for BatchModel {
    fn provider(&self) -> &str {
        "test"
    }

    fn model_id(&self) -> &str {
        "batch"
    }

    async fn generate(&self, _request: ModelRequest) -> anyhow::Result<ModelResponse> {
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no batch response left"))
    }
}

/// Records observed event names in order
#[derive(Default)]
pub(crate) struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(ObservedEvent::name).collect()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }
}

impl ThreadObserver for RecordingObserver {
    fn on_event(&self, event: &ObservedEvent) {
        self.events.lock().push(event.clone());
    }
}

/// In-memory store with switchable failures
#[derive(Default)]
pub(crate) struct FailingStore {
    inner: InMemoryThreadStore,
    pub fail_insert: AtomicBool,
    pub fail_update: AtomicBool,
    pub fail_append: AtomicBool,
    appends: AtomicUsize,
}

impl FailingStore {
    pub fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    fn check(flag: &AtomicBool, op: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("injected {} failure", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl ThreadStore for FailingStore {
    async fn get(&self, tid: &str, options: &GetOptions) -> Result<Option<ThreadSnapshot>, StoreError> {
        self.inner.get(tid, options).await
    }

    async fn list(&self, options: &ListOptions) -> Result<Vec<ThreadRecord>, StoreError> {
        self.inner.list(options).await
    }

    async fn insert(&self, thread: NewThread) -> Result<ThreadRecord, StoreError> {
        Self::check(&self.fail_insert, "insert")?;
        self.inner.insert(thread).await
    }

    async fn update(&self, tid: &str, update: ThreadUpdate) -> Result<ThreadRecord, StoreError> {
        Self::check(&self.fail_update, "update")?;
        self.inner.update(tid, update).await
    }

    async fn delete(&self, tid: &str) -> Result<(), StoreError> {
        self.inner.delete(tid).await
    }

    async fn history(&self, tid: &str, options: &HistoryOptions) -> Result<Vec<ThreadEvent>, StoreError> {
        self.inner.history(tid, options).await
    }

    async fn append(&self, events: &[ThreadEvent]) -> Result<(), StoreError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_append, "append")?;
        self.inner.append(events).await
    }

    async fn acquire_lease(&self, tid: &str, owner: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inner.acquire_lease(tid, owner, ttl).await
    }

    async fn release_lease(&self, tid: &str, owner: &str) -> Result<(), StoreError> {
        self.inner.release_lease(tid, owner).await
    }
}

/// `echo` tool: returns "Echo: {text}"
pub(crate) fn echo_tool() -> Tool {
    FunctionTool::new("echo", "Echo the given text", |_ctx: ToolContext, args: Value| async move {
        let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
        Ok(Value::String(format!("Echo: {}", text)))
    })
    .parameters(serde_json::json!({
        "type": "object",
        "properties": {"text": {"type": "string"}},
        "required": ["text"]
    }))
    .into()
}
