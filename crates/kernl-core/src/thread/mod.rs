//! Threads: one resumable conversation and its execution engine
//!
//! ## Components
//! - `ThreadEvent` / `EventLog` - append-only log with stage/flush split
//! - `ActionSet` - tool-call intentions of one tick
//! - `engine` - tick loop, checkpointing, model streaming
//! - `executor` - parallel tool fan-out
//! - `ThreadStream` / `ThreadResult` - what callers get back
//!
//! A `Thread` runs at most one execution at a time. `stream()` flips it to
//! RUNNING and spawns the tick loop; the loop always flips it back to
//! STOPPED, whatever happened.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::config::KernlConfig;
use crate::constants::DEFAULT_NAMESPACE;
use crate::error::{KernlError, Result};
use crate::model::{LanguageModel, Message, ModelItem};
use crate::observe::{ThreadObserver, TracingObserver};
use crate::storage::{ThreadRecord, ThreadStore};
use crate::tool::Context;

mod actions;
mod engine;
pub mod event;
mod executor;
mod log;
mod request;
mod state;
mod stream;

pub use actions::{terminal_text, ActionSet};
pub use event::{EventData, EventKind, SystemEvent, ThreadEvent};
pub use log::EventLog;
pub use state::ThreadState;
pub use stream::{ThreadOutcome, ThreadResult, ThreadStream, ThreadStreamEvent};

type FinishHook = Box<dyn Fn(&str) + Send + Sync>;

/// Options for a fresh thread
#[derive(Clone, Default)]
pub struct ThreadOptions {
    /// Explicit thread id; a UUID is generated otherwise
    pub tid: Option<String>,
    pub namespace: Option<String>,
    /// Overrides the agent's default model
    pub model: Option<Arc<dyn LanguageModel>>,
    pub context: Context,
    pub metadata: Map<String, Value>,
}

impl ThreadOptions {
    pub fn with_tid(mut self, tid: impl Into<String>) -> Self {
        self.tid = Some(tid.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Status {
    state: ThreadState,
    tick: u32,
}

/// Mutable execution state. Only the task holding the lock touches it.
struct ThreadCore {
    context: Context,
    tick: u32,
    log: EventLog,
    metadata: Map<String, Value>,
    /// Record exists in the store
    persisted: bool,
    /// A storage call failed; no further checkpoint is attempted
    poisoned: bool,
}

pub struct Thread {
    tid: String,
    namespace: String,
    agent: Arc<Agent>,
    model: Arc<dyn LanguageModel>,
    store: Option<Arc<dyn ThreadStore>>,
    observer: Arc<dyn ThreadObserver>,
    config: KernlConfig,
    lease_owner: Option<String>,
    /// Id of the `Kernl` runtime that built this thread
    runtime: Option<String>,
    on_finish: Option<FinishHook>,
    status: parking_lot::Mutex<Status>,
    cancel: parking_lot::Mutex<CancellationToken>,
    core: tokio::sync::Mutex<ThreadCore>,
}

impl Thread {
    /// Fresh thread. `input` is appended (and staged) immediately.
    pub fn new(agent: Arc<Agent>, input: impl IntoIterator<Item = ModelItem>, options: ThreadOptions) -> Self {
        let tid = options
            .tid
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut log = EventLog::new(tid.clone());
        for item in input {
            log.append(item);
        }

        Self::assemble(
            tid,
            options.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            options.model.unwrap_or_else(|| agent.model().clone()),
            agent,
            ThreadCore {
                context: options.context,
                tick: 0,
                log,
                metadata: options.metadata,
                persisted: false,
                poisoned: false,
            },
            ThreadState::Stopped,
        )
    }

    /// Fresh thread seeded with one user message
    pub fn from_text(agent: Arc<Agent>, text: impl Into<String>) -> Self {
        Self::new(
            agent,
            [ModelItem::Message(Message::user(text))],
            ThreadOptions::default(),
        )
    }

    /// Rebuild a persisted thread from its record and history.
    ///
    /// A record left RUNNING by a crashed executor is hydrated as STOPPED;
    /// unanswered tool calls in its log are resolved on the next run.
    pub fn hydrate(
        agent: Arc<Agent>,
        model: Arc<dyn LanguageModel>,
        record: ThreadRecord,
        history: Vec<ThreadEvent>,
    ) -> Self {
        let state = match record.state {
            ThreadState::Dead => ThreadState::Dead,
            _ => ThreadState::Stopped,
        };
        let log = EventLog::hydrate(record.tid.clone(), history, record.seq);

        Self::assemble(
            record.tid,
            record.namespace,
            model,
            agent,
            ThreadCore {
                context: record.context,
                tick: record.tick,
                log,
                metadata: record.metadata,
                persisted: true,
                poisoned: false,
            },
            state,
        )
    }

    fn assemble(
        tid: String,
        namespace: String,
        model: Arc<dyn LanguageModel>,
        agent: Arc<Agent>,
        core: ThreadCore,
        state: ThreadState,
    ) -> Self {
        Self {
            tid,
            namespace,
            agent,
            model,
            store: None,
            observer: Arc::new(TracingObserver),
            config: KernlConfig::default(),
            lease_owner: None,
            runtime: None,
            on_finish: None,
            status: parking_lot::Mutex::new(Status {
                state,
                tick: core.tick,
            }),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
            core: tokio::sync::Mutex::new(core),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ThreadStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ThreadObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_config(mut self, config: KernlConfig) -> Self {
        self.config = config;
        self
    }

    /// Renew a storage lease under this owner id at every checkpoint and
    /// release it when an execution ends.
    pub fn with_lease_owner(mut self, owner: impl Into<String>) -> Self {
        self.lease_owner = Some(owner.into());
        self
    }

    /// Bind the thread to a runtime. `hook` runs once per execution, after
    /// the final checkpoint and lease release.
    pub(crate) fn attach(
        mut self,
        runtime: impl Into<String>,
        hook: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.runtime = Some(runtime.into());
        self.on_finish = Some(Box::new(hook));
        self
    }

    pub(crate) fn runtime(&self) -> Option<&str> {
        self.runtime.as_deref()
    }

    pub fn tid(&self) -> &str {
        &self.tid
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn model(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    pub fn state(&self) -> ThreadState {
        self.status.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == ThreadState::Running
    }

    /// Model round-trips made over the thread's lifetime
    pub fn tick(&self) -> u32 {
        self.status.lock().tick
    }

    /// Start an execution and stream its events.
    ///
    /// Fails immediately (without spawning) when the thread is already
    /// running, is dead, or its toolkits are misconfigured.
    pub async fn stream(self: &Arc<Self>) -> Result<ThreadStream> {
        let cancel = self.begin()?;

        let context = self.core.lock().await.context.clone();
        if let Err(e) = self.agent.tools(&context).await {
            self.set_state(ThreadState::Stopped);
            return Err(e);
        }

        let (tx, rx) = tokio::sync::mpsc::channel(self.config.stream_buffer.max(1));
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { engine::run(this, tx, cancel).await });
        Ok(ThreadStream::new(rx, handle))
    }

    /// Run to completion, discarding intermediate events.
    pub async fn execute(self: &Arc<Self>) -> Result<ThreadResult> {
        self.stream().await?.result().await
    }

    /// Request cooperative cancellation of the running execution.
    pub fn cancel(&self) {
        if self.is_running() {
            tracing::info!(tid = %self.tid, "Cancellation requested");
            self.cancel.lock().cancel();
        }
    }

    /// Append input for the next execution.
    pub async fn push(&self, items: impl IntoIterator<Item = ModelItem>) -> Result<()> {
        let mut core = self.idle_core()?;
        for item in items {
            core.log.append(item);
        }
        Ok(())
    }

    /// Approve a withheld tool call. Takes effect on the next execution.
    pub async fn approve(&self, call_id: &str) -> Result<()> {
        self.decide(|ctx| ctx.approve(call_id)).await
    }

    /// Deny a withheld tool call; it resolves to FAILED on the next execution.
    pub async fn deny(&self, call_id: &str, reason: Option<String>) -> Result<()> {
        self.decide(|ctx| ctx.deny(call_id, reason)).await
    }

    async fn decide(&self, record: impl FnOnce(&mut Context)) -> Result<()> {
        let context = {
            let mut core = self.idle_core()?;
            record(&mut core.context);
            core.persisted.then(|| core.context.clone())
        };

        if let (Some(store), Some(context)) = (&self.store, context) {
            store
                .update(
                    &self.tid,
                    crate::storage::ThreadUpdate {
                        context: Some(context),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }

    pub async fn context(&self) -> Context {
        self.core.lock().await.context.clone()
    }

    /// Full in-memory history. Waits for a running execution to finish.
    pub async fn history(&self) -> Vec<ThreadEvent> {
        self.core.lock().await.log.events().to_vec()
    }

    /// Claim RUNNING and hand out a fresh cancellation token.
    fn begin(&self) -> Result<CancellationToken> {
        let mut status = self.status.lock();
        match status.state {
            ThreadState::Running => return Err(KernlError::AlreadyRunning(self.tid.clone())),
            ThreadState::Dead => {
                return Err(KernlError::Misconfiguration(format!(
                    "thread {} is dead",
                    self.tid
                )))
            }
            ThreadState::Stopped => {}
        }
        status.state = ThreadState::Running;

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        Ok(token)
    }

    fn set_state(&self, state: ThreadState) {
        self.status.lock().state = state;
    }

    fn idle_core(&self) -> Result<tokio::sync::MutexGuard<'_, ThreadCore>> {
        if self.is_running() {
            return Err(KernlError::AlreadyRunning(self.tid.clone()));
        }
        self.core
            .try_lock()
            .map_err(|_| KernlError::AlreadyRunning(self.tid.clone()))
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = *self.status.lock();
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("namespace", &self.namespace)
            .field("agent", &self.agent.id())
            .field("state", &status.state)
            .field("tick", &status.tick)
            .finish()
    }
}
