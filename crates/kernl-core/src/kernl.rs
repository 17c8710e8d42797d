//! Kernl: agent registry and thread orchestration
//!
//! Enforces one live executor per thread id. In-process that is the `live`
//! map; across processes it is the storage lease, taken before a persisted
//! thread runs and renewed at every checkpoint.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::agent::Agent;
use crate::config::KernlConfig;
use crate::error::{KernlError, Result};
use crate::model::{LanguageModel, ModelItem, ModelRegistry};
use crate::observe::{ThreadObserver, TracingObserver};
use crate::storage::{
    GetOptions, HistoryOptions, ListOptions, StoreError, ThreadRecord, ThreadStore, ThreadUpdate,
};
use crate::thread::{Thread, ThreadEvent, ThreadOptions, ThreadResult, ThreadStream};

pub struct Kernl {
    agents: RwLock<HashMap<String, Arc<Agent>>>,
    models: ModelRegistry,
    store: Option<Arc<dyn ThreadStore>>,
    observer: Arc<dyn ThreadObserver>,
    config: KernlConfig,
    live: Arc<DashMap<String, Arc<Thread>>>,
    /// Lease owner id for this process
    writer_id: String,
}

impl Kernl {
    pub fn new(config: KernlConfig) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            models: ModelRegistry::new(),
            store: None,
            observer: Arc::new(TracingObserver),
            config,
            live: Arc::new(DashMap::new()),
            writer_id: uuid::Uuid::new_v4().to_string(),
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

    pub fn config(&self) -> &KernlConfig {
        &self.config
    }

    pub fn writer_id(&self) -> &str {
        &self.writer_id
    }

    /// Register an agent (and its default model). Re-registering an id
    /// replaces the previous agent.
    pub fn register_agent(&self, agent: Agent) -> Arc<Agent> {
        let agent = Arc::new(agent);
        self.models.register(agent.model().clone());
        self.agents
            .write()
            .insert(agent.id().to_string(), agent.clone());
        tracing::info!(agent = %agent.id(), "Registered agent");
        agent
    }

    /// Make a model available for hydrating threads that override the
    /// agent default.
    pub fn register_model(&self, model: Arc<dyn LanguageModel>) {
        self.models.register(model);
    }

    pub fn agent(&self, id: &str) -> Result<Arc<Agent>> {
        self.agents
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| KernlError::UnknownAgent(id.to_string()))
    }

    /// Create a fresh thread wired to this runtime.
    pub fn thread(
        &self,
        agent_id: &str,
        input: impl IntoIterator<Item = ModelItem>,
        options: ThreadOptions,
    ) -> Result<Arc<Thread>> {
        let agent = self.agent(agent_id)?;
        if let Some(model) = &options.model {
            self.models.register(model.clone());
        }
        Ok(Arc::new(self.wire(Thread::new(agent, input, options))))
    }

    /// Hydrate a persisted thread with its full history. Returns the live
    /// instance when the thread is running in this process.
    pub async fn resume(&self, tid: &str) -> Result<Arc<Thread>> {
        if let Some(live) = self.live.get(tid) {
            return Ok(live.clone());
        }

        let store = self.require_store()?;
        let snapshot = store
            .get(tid, &GetOptions::with_history())
            .await?
            .ok_or_else(|| KernlError::ThreadNotFound(tid.to_string()))?;

        let agent = self.agent(&snapshot.record.agent_id)?;
        let record = &snapshot.record;
        let model = self
            .models
            .get(&record.model_provider, &record.model_id)
            .ok_or_else(|| {
                KernlError::Misconfiguration(format!(
                    "model {}/{} of thread {} is not registered",
                    record.model_provider, record.model_id, tid
                ))
            })?;

        tracing::debug!(tid = %tid, events = snapshot.history.len(), "Hydrated thread");
        Ok(Arc::new(self.wire(Thread::hydrate(
            agent,
            model,
            snapshot.record,
            snapshot.history,
        ))))
    }

    fn wire(&self, thread: Thread) -> Thread {
        let live = Arc::clone(&self.live);
        let mut thread = thread
            .with_observer(self.observer.clone())
            .with_config(self.config.clone())
            .with_lease_owner(self.writer_id.clone())
            .attach(self.writer_id.clone(), move |tid| {
                live.remove(tid);
            });
        if let Some(store) = &self.store {
            thread = thread.with_store(store.clone());
        }
        thread
    }

    /// Start a thread and stream its events.
    ///
    /// Only threads built by this runtime (`thread()` or `resume()`) are
    /// accepted; anything else could never leave the live map.
    pub async fn spawn(&self, thread: &Arc<Thread>) -> Result<ThreadStream> {
        if thread.runtime() != Some(self.writer_id.as_str()) {
            return Err(KernlError::Misconfiguration(format!(
                "thread {} was not created by this runtime; use Kernl::thread or Kernl::resume",
                thread.tid()
            )));
        }
        self.claim(thread).await?;
        match thread.stream().await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                self.unclaim(thread).await;
                Err(e)
            }
        }
    }

    /// Run a thread to completion.
    pub async fn schedule(&self, thread: &Arc<Thread>) -> Result<ThreadResult> {
        self.spawn(thread).await?.result().await
    }

    /// Cancel a running thread. Returns false when it is not running here,
    /// including a thread that is claimed but has not started yet.
    pub fn cancel(&self, tid: &str) -> bool {
        match self.live.get(tid) {
            Some(thread) if thread.is_running() => {
                thread.cancel();
                true
            }
            _ => false,
        }
    }

    /// Approve a withheld tool call of a stopped, persisted thread.
    pub async fn approve(&self, tid: &str, call_id: &str) -> Result<()> {
        self.decide(tid, |ctx| ctx.approve(call_id)).await
    }

    /// Deny a withheld tool call of a stopped, persisted thread.
    pub async fn deny(&self, tid: &str, call_id: &str, reason: Option<String>) -> Result<()> {
        self.decide(tid, |ctx| ctx.deny(call_id, reason)).await
    }

    async fn decide(&self, tid: &str, record: impl FnOnce(&mut crate::tool::Context)) -> Result<()> {
        if self.live.contains_key(tid) {
            return Err(KernlError::ThreadBusy(tid.to_string()));
        }
        let store = self.require_store()?;
        let snapshot = store
            .get(tid, &GetOptions::default())
            .await?
            .ok_or_else(|| KernlError::ThreadNotFound(tid.to_string()))?;

        let mut context = snapshot.record.context;
        record(&mut context);
        store
            .update(
                tid,
                ThreadUpdate {
                    context: Some(context),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    pub async fn get(&self, tid: &str) -> Result<Option<ThreadRecord>> {
        let store = self.require_store()?;
        Ok(store
            .get(tid, &GetOptions::default())
            .await?
            .map(|snapshot| snapshot.record))
    }

    pub async fn list(&self, options: &ListOptions) -> Result<Vec<ThreadRecord>> {
        Ok(self.require_store()?.list(options).await?)
    }

    pub async fn history(&self, tid: &str, options: &HistoryOptions) -> Result<Vec<ThreadEvent>> {
        Ok(self.require_store()?.history(tid, options).await?)
    }

    /// Delete a thread and its events. Refused while it is running.
    pub async fn delete(&self, tid: &str) -> Result<()> {
        if self.live.contains_key(tid) {
            return Err(KernlError::ThreadBusy(tid.to_string()));
        }
        self.require_store()?.delete(tid).await?;
        tracing::info!(tid = %tid, "Deleted thread");
        Ok(())
    }

    fn require_store(&self) -> Result<&Arc<dyn ThreadStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| KernlError::Misconfiguration("no thread store configured".into()))
    }

    async fn claim(&self, thread: &Arc<Thread>) -> Result<()> {
        match self.live.entry(thread.tid().to_string()) {
            Entry::Occupied(_) => return Err(KernlError::ThreadBusy(thread.tid().to_string())),
            Entry::Vacant(slot) => {
                slot.insert(thread.clone());
            }
        }

        // Fresh threads have no record yet; their lease is taken at the
        // first checkpoint.
        if let Some(store) = &self.store {
            match store
                .acquire_lease(thread.tid(), &self.writer_id, self.config.lease_ttl())
                .await
            {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(StoreError::LeaseHeld { owner, .. }) => {
                    tracing::warn!(tid = %thread.tid(), owner = %owner, "Thread leased elsewhere");
                    self.live.remove(thread.tid());
                    return Err(KernlError::ThreadBusy(thread.tid().to_string()));
                }
                Err(e) => {
                    self.live.remove(thread.tid());
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    async fn unclaim(&self, thread: &Thread) {
        self.live.remove(thread.tid());
        if let Some(store) = &self.store {
            if let Err(e) = store.release_lease(thread.tid(), &self.writer_id).await {
                tracing::warn!(tid = %thread.tid(), error = %e, "Failed to release thread lease");
            }
        }
    }
}

impl Default for Kernl {
    fn default() -> Self {
        Self::new(KernlConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::model::Message;
    use crate::storage::InMemoryThreadStore;
    use crate::test_support::{echo_tool, ScriptedModel};
    use crate::thread::{ThreadOutcome, ThreadState};
    use crate::tool::{FunctionTool, FunctionToolkit, ToolCall, ToolCallState, ToolContext};
    use serde_json::Value;

    fn kernl_with(model: Arc<ScriptedModel>) -> (Kernl, Arc<InMemoryThreadStore>) {
        let store = Arc::new(InMemoryThreadStore::new());
        let kernl = Kernl::default().with_store(store.clone());
        kernl.register_agent(
            Agent::builder("helper")
                .model(model)
                .toolkit(FunctionToolkit::new("basics").with_tool(echo_tool()).with_tool(
                    FunctionTool::new("deploy", "Deploy", |_ctx: ToolContext, _args: Value| async move {
                        Ok(Value::String("deployed".into()))
                    })
                    .requires_approval_always(true),
                ))
                .build()
                .unwrap(),
        );
        (kernl, store)
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let kernl = Kernl::default();
        let err = kernl
            .thread("ghost", [Message::user("hi").into()], ThreadOptions::default())
            .unwrap_err();
        assert!(matches!(err, KernlError::UnknownAgent(ref id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_schedule_then_resume_from_store() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::text_turn("first"),
            ScriptedModel::text_turn("second"),
        ]));
        let (kernl, _store) = kernl_with(model.clone());

        let thread = kernl
            .thread("helper", [Message::user("hi").into()], ThreadOptions::default().with_tid("t1"))
            .unwrap();
        let result = kernl.schedule(&thread).await.unwrap();
        assert_eq!(result.text(), Some("first"));

        let record = kernl.get("t1").await.unwrap().unwrap();
        assert_eq!(record.state, ThreadState::Stopped);
        assert_eq!(record.tick, 1);
        assert_eq!(record.seq, Some(1));

        let resumed = kernl.resume("t1").await.unwrap();
        assert!(!Arc::ptr_eq(&resumed, &thread));
        resumed.push([Message::user("again").into()]).await.unwrap();
        let result = kernl.schedule(&resumed).await.unwrap();
        assert_eq!(result.text(), Some("second"));
        assert_eq!(result.tick, 2);

        let seqs: Vec<u64> = kernl
            .history("t1", &HistoryOptions::all())
            .await
            .unwrap()
            .iter()
            .map(|e| e.seq)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_single_live_executor_per_tid() {
        let model = Arc::new(ScriptedModel::new(vec![]).then_hang());
        let (kernl, _store) = kernl_with(model);

        let thread = kernl
            .thread("helper", [Message::user("hi").into()], ThreadOptions::default().with_tid("t1"))
            .unwrap();
        let stream = kernl.spawn(&thread).await.unwrap();

        let err = kernl.spawn(&thread).await.unwrap_err();
        assert!(matches!(err, KernlError::ThreadBusy(_)));
        let err = kernl.delete("t1").await.unwrap_err();
        assert!(matches!(err, KernlError::ThreadBusy(_)));

        assert!(kernl.cancel("t1"));
        let result = stream.result().await.unwrap();
        assert_eq!(result.outcome, ThreadOutcome::Cancelled);
        assert!(!kernl.cancel("t1"));

        kernl.delete("t1").await.unwrap();
        assert!(kernl.get("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_lease_blocks_spawn() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::text_turn("one"),
            ScriptedModel::text_turn("two"),
        ]));
        let (kernl, store) = kernl_with(model);

        let thread = kernl
            .thread("helper", [Message::user("hi").into()], ThreadOptions::default().with_tid("t1"))
            .unwrap();
        kernl.schedule(&thread).await.unwrap();

        store
            .acquire_lease("t1", "other-process", Duration::from_secs(60))
            .await
            .unwrap();
        let resumed = kernl.resume("t1").await.unwrap();
        let err = kernl.spawn(&resumed).await.unwrap_err();
        assert!(matches!(err, KernlError::ThreadBusy(_)));
        assert!(!resumed.is_running());
    }

    #[tokio::test]
    async fn test_approval_through_kernl() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::tool_turn(vec![ToolCall::new("call_1", "deploy", "{}")]),
            ScriptedModel::text_turn("Shipped."),
        ]));
        let (kernl, _store) = kernl_with(model.clone());

        let thread = kernl
            .thread("helper", [Message::user("ship it").into()], ThreadOptions::default().with_tid("t1"))
            .unwrap();
        let result = kernl.schedule(&thread).await.unwrap();
        assert_eq!(result.pending(), &[ToolCall::new("call_1", "deploy", "{}")]);

        kernl.approve("t1", "call_1").await.unwrap();
        let resumed = kernl.resume("t1").await.unwrap();
        let result = kernl.schedule(&resumed).await.unwrap();
        assert_eq!(result.text(), Some("Shipped."));

        let history = kernl.history("t1", &HistoryOptions::all()).await.unwrap();
        let deploy = history
            .iter()
            .find_map(|e| e.as_tool_result())
            .unwrap();
        assert_eq!(deploy.state, ToolCallState::Completed);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_spawn_rejects_threads_built_elsewhere() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptedModel::text_turn("one")]));
        let (kernl, store) = kernl_with(model.clone());

        let outsider = Arc::new(
            Thread::new(
                kernl.agent("helper").unwrap(),
                [Message::user("hi").into()],
                ThreadOptions::default().with_tid("t1"),
            )
            .with_store(store.clone()),
        );
        let err = kernl.schedule(&outsider).await.unwrap_err();
        assert!(matches!(err, KernlError::Misconfiguration(_)));
        assert_eq!(model.calls(), 0);

        // Nothing was left claimed for the tid.
        assert!(!kernl.cancel("t1"));
        kernl.delete("t1").await.unwrap();
        let thread = kernl
            .thread("helper", [Message::user("hi").into()], ThreadOptions::default().with_tid("t1"))
            .unwrap();
        assert_eq!(kernl.schedule(&thread).await.unwrap().text(), Some("one"));

        // Lease was released at the end of the run.
        store
            .acquire_lease("t1", "other-process", Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_before_start_is_not_reported() {
        let (kernl, _store) = kernl_with(Arc::new(ScriptedModel::new(vec![])));
        let thread = kernl
            .thread("helper", [Message::user("hi").into()], ThreadOptions::default().with_tid("t1"))
            .unwrap();

        // Claimed but not yet RUNNING.
        kernl.live.insert("t1".to_string(), thread.clone());
        assert!(!kernl.cancel("t1"));
        assert_eq!(thread.state(), ThreadState::Stopped);
    }

    #[tokio::test]
    async fn test_resume_unknown_thread() {
        let (kernl, _store) = kernl_with(Arc::new(ScriptedModel::new(vec![])));
        let err = kernl.resume("nope").await.unwrap_err();
        assert!(matches!(err, KernlError::ThreadNotFound(_)));
    }
}
