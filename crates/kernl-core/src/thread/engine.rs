//! The tick loop
//!
//! One execution:
//! 1. checkpoint RUNNING (persists the record and initial input), then
//!    emit `thread.start`
//! 2. resolve intentions left pending by an earlier execution
//! 3. tick until a terminal response, an approval stop, cancellation,
//!    or an error
//! 4. always: checkpoint STOPPED, unless storage already failed
//!
//! Checkpoint order is insert (first time only), lease renewal, append of
//! staged events, then the `{tick, state, context}` projection. Any storage
//! failure poisons the thread for the rest of the execution.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::actions::{terminal_text, ActionSet};
use super::executor::execute_calls;
use super::request::prepare_request;
use super::stream::{ThreadOutcome, ThreadResult, ThreadStreamEvent};
use super::{Thread, ThreadCore, ThreadState};
use crate::error::{KernlError, Result};
use crate::model::{LanguageModel, ModelItem, ModelRequest, ModelStream, StreamItem};
use crate::observe::{notify, ObservedEvent, SpanContext};
use crate::storage::{NewThread, StoreError, ThreadUpdate};
use crate::tool::{ToolCall, ToolContext, ToolSet};

type Events = mpsc::Sender<ThreadStreamEvent>;

async fn emit(tx: &Events, event: ThreadStreamEvent) {
    // A dropped receiver does not stop the execution.
    let _ = tx.send(event).await;
}

pub(super) async fn run(thread: Arc<Thread>, tx: Events, cancel: CancellationToken) -> Result<ThreadResult> {
    let span = tracing::info_span!("thread", tid = %thread.tid, agent = %thread.agent.id());
    run_inner(thread, tx, cancel).instrument(span).await
}

async fn run_inner(thread: Arc<Thread>, tx: Events, cancel: CancellationToken) -> Result<ThreadResult> {
    let span = SpanContext::root();
    let mut core = thread.core.lock().await;

    // Persists the record and initial input before anything is observed.
    let started = checkpoint(&thread, &mut core, ThreadState::Running).await;
    notify(
        thread.observer.as_ref(),
        ObservedEvent::ThreadStart {
            tid: thread.tid.clone(),
            agent_id: thread.agent.id().to_string(),
            namespace: thread.namespace.clone(),
            span: span.clone(),
        },
    );

    let outcome = match started {
        Ok(()) => AssertUnwindSafe(run_ticks(&thread, &mut core, &tx, &cancel, &span))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(KernlError::TaskFailed("tick loop panicked".into()))),
        Err(e) => Err(e),
    };

    // Final checkpoint runs whatever the loop did, unless storage is what failed.
    let finished = if core.poisoned {
        Ok(())
    } else {
        checkpoint(&thread, &mut core, ThreadState::Stopped).await
    };
    let tick = core.tick;
    drop(core);
    thread.set_state(ThreadState::Stopped);

    release_lease(&thread).await;
    if let Some(hook) = &thread.on_finish {
        hook(&thread.tid);
    }

    let result = match (outcome, finished) {
        (Ok(outcome), Ok(())) => Ok(ThreadResult {
            tid: thread.tid.clone(),
            tick,
            outcome,
        }),
        (Err(e), _) | (Ok(_), Err(e)) => Err(e),
    };

    notify(
        thread.observer.as_ref(),
        ObservedEvent::ThreadStop {
            tid: thread.tid.clone(),
            tick,
            result: result
                .as_ref()
                .ok()
                .and_then(|r| serde_json::to_value(&r.outcome).ok()),
            error: result.as_ref().err().map(ToString::to_string),
            span,
        },
    );

    match &result {
        Ok(result) => {
            tracing::info!(tick, outcome = ?result.outcome, "Execution finished");
            emit(&tx, ThreadStreamEvent::Done { result: result.clone() }).await;
        }
        Err(e) => {
            tracing::warn!(tick, error = %e, "Execution failed");
            emit(&tx, ThreadStreamEvent::Error { error: e.to_string() }).await;
        }
    }
    result
}

async fn run_ticks(
    thread: &Thread,
    core: &mut ThreadCore,
    tx: &Events,
    cancel: &CancellationToken,
    span: &SpanContext,
) -> Result<ThreadOutcome> {
    // Intentions left over from an approval stop or a crash.
    let leftover = core.log.pending_tool_calls();
    if !leftover.is_empty() {
        tracing::info!(count = leftover.len(), "Resolving pending tool calls");
        let tools = thread.agent.tools(&core.context).await?;
        let pending = run_actions(thread, core, tx, &leftover, &tools, span).await?;
        checkpoint(thread, core, ThreadState::Running).await?;
        if !pending.is_empty() {
            return Ok(interrupted(tx, pending).await);
        }
    }

    let max_ticks = thread.config.max_ticks;
    let mut ticks = 0u32;
    let mut empty_ticks = 0u32;

    loop {
        if cancel.is_cancelled() {
            tracing::info!(tick = core.tick, "Execution cancelled");
            return Ok(ThreadOutcome::Cancelled);
        }
        if ticks >= max_ticks {
            return Err(KernlError::TickLimit { limit: max_ticks });
        }

        ticks += 1;
        core.tick += 1;
        thread.status.lock().tick = core.tick;
        let tick = core.tick;
        let tick_span = span.child();
        notify(
            thread.observer.as_ref(),
            ObservedEvent::TickStart {
                tid: thread.tid.clone(),
                tick,
                span: tick_span.clone(),
            },
        );

        let tools = thread.agent.tools(&core.context).await?;
        let request = prepare_request(
            &thread.agent,
            &core.context,
            core.log.events(),
            &tools,
            tick_span.child(),
        )
        .await?;

        let Some(response) = stream_model(
            thread.model.as_ref(),
            request,
            thread.config.model_idle_timeout(),
            cancel,
            tx,
            tick,
        )
        .await
        else {
            tracing::info!(tick, "Execution cancelled mid-stream");
            return Ok(ThreadOutcome::Cancelled);
        };

        for item in &response.items {
            let event = core.log.append(item.clone());
            emit(tx, ThreadStreamEvent::Event { event }).await;
        }

        if let Some(error) = response.error {
            return Err(KernlError::ModelCall(error));
        }

        match ActionSet::from_items(&response.items) {
            None => match terminal_text(&response.items) {
                Some(text) => {
                    let value = thread.agent.response().parse(&text)?;
                    checkpoint(thread, core, ThreadState::Running).await?;
                    return Ok(ThreadOutcome::Completed { value });
                }
                None => {
                    empty_ticks += 1;
                    tracing::debug!(tick, empty_ticks, "Tick produced no actionable output");
                    if empty_ticks >= thread.config.max_empty_ticks {
                        return Err(KernlError::ModelBehavior(format!(
                            "model produced no actionable output in {} consecutive ticks",
                            empty_ticks
                        )));
                    }
                }
            },
            Some(actions) => {
                empty_ticks = 0;
                let pending = run_actions(thread, core, tx, actions.calls(), &tools, &tick_span).await?;
                checkpoint(thread, core, ThreadState::Running).await?;
                if !pending.is_empty() {
                    return Ok(interrupted(tx, pending).await);
                }
            }
        }
    }
}

/// Execute calls and append the resolved results. Returns the calls still
/// waiting for approval.
async fn run_actions(
    thread: &Thread,
    core: &mut ThreadCore,
    tx: &Events,
    calls: &[ToolCall],
    tools: &ToolSet,
    span: &SpanContext,
) -> Result<Vec<ToolCall>> {
    let base = ToolContext::new(core.context.clone())
        .with_thread(thread.tid.clone(), thread.namespace.clone())
        .with_span(span.clone())
        .with_timeout(thread.config.tool_timeout());

    let execution = execute_calls(calls, tools, &base, thread.observer.as_ref()).await?;
    for result in execution.results {
        let event = core.log.append(ModelItem::ToolResult(result));
        emit(tx, ThreadStreamEvent::Event { event }).await;
    }
    Ok(execution.pending)
}

async fn interrupted(tx: &Events, pending: Vec<ToolCall>) -> ThreadOutcome {
    tracing::info!(count = pending.len(), "Tool calls awaiting approval");
    emit(
        tx,
        ThreadStreamEvent::ApprovalRequired {
            calls: pending.clone(),
        },
    )
    .await;
    ThreadOutcome::Interrupted { pending }
}

struct TickResponse {
    items: Vec<ModelItem>,
    error: Option<String>,
}

/// Drive one model call. Deltas are forwarded, complete items collected.
/// A model error, stream error item or idle timeout all end up in `error`.
/// Returns `None` when cancelled; partial items are discarded.
async fn stream_model(
    model: &dyn LanguageModel,
    request: ModelRequest,
    idle_timeout: Duration,
    cancel: &CancellationToken,
    tx: &Events,
    tick: u32,
) -> Option<TickResponse> {
    let mut response = TickResponse {
        items: Vec::new(),
        error: None,
    };

    // Batch models do all their waiting while the stream is being opened.
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        opened = tokio::time::timeout(idle_timeout, model.stream(request)) => opened,
    };
    let mut stream = match opened {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => failed_stream(e.to_string()),
        Err(_) => failed_stream(idle_error(idle_timeout)),
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
        };

        let item = match next {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(_) => {
                response.error = Some(idle_error(idle_timeout));
                break;
            }
        };

        match item.into_model_item() {
            Ok(item) => response.items.push(item),
            Err(StreamItem::Error { error }) => {
                response.error = Some(error);
                break;
            }
            Err(StreamItem::Finish {
                finish_reason,
                usage,
            }) => {
                emit(
                    tx,
                    ThreadStreamEvent::ModelFinish {
                        tick,
                        finish_reason,
                        usage,
                    },
                )
                .await;
            }
            Err(delta) => emit(tx, ThreadStreamEvent::Delta { item: delta }).await,
        }
    }
    Some(response)
}

fn failed_stream(error: String) -> ModelStream {
    futures::stream::iter([StreamItem::Error { error }]).boxed()
}

fn idle_error(idle_timeout: Duration) -> String {
    format!("model stream produced nothing for {:?}", idle_timeout)
}

/// Persist the record (first time), staged events and the latest projection.
async fn checkpoint(thread: &Thread, core: &mut ThreadCore, state: ThreadState) -> Result<()> {
    let Some(store) = &thread.store else {
        let staged = core.log.staged().len();
        core.log.mark_flushed(staged);
        return Ok(());
    };

    match flush(thread, store.as_ref(), core, state).await {
        Ok(()) => Ok(()),
        Err(e) => {
            core.poisoned = true;
            tracing::error!(error = %e, "Checkpoint failed");
            Err(e.into())
        }
    }
}

async fn flush(
    thread: &Thread,
    store: &dyn crate::storage::ThreadStore,
    core: &mut ThreadCore,
    state: ThreadState,
) -> std::result::Result<(), StoreError> {
    if !core.persisted {
        store
            .insert(NewThread {
                tid: thread.tid.clone(),
                namespace: thread.namespace.clone(),
                agent_id: thread.agent.id().to_string(),
                model_provider: thread.model.provider().to_string(),
                model_id: thread.model.model_id().to_string(),
                context: core.context.clone(),
                state,
                tick: core.tick,
                metadata: core.metadata.clone(),
            })
            .await?;
        core.persisted = true;
    }

    if let Some(owner) = &thread.lease_owner {
        store
            .acquire_lease(&thread.tid, owner, thread.config.lease_ttl())
            .await?;
    }

    let staged = core.log.staged().to_vec();
    if !staged.is_empty() {
        store.append(&staged).await?;
        core.log.mark_flushed(staged.len());
    }

    store
        .update(
            &thread.tid,
            ThreadUpdate {
                tick: Some(core.tick),
                state: Some(state),
                context: Some(core.context.clone()),
                metadata: None,
            },
        )
        .await?;

    tracing::trace!(events = staged.len(), state = %state, "Checkpoint written");
    Ok(())
}

async fn release_lease(thread: &Thread) {
    if let (Some(store), Some(owner)) = (&thread.store, &thread.lease_owner) {
        if let Err(e) = store.release_lease(&thread.tid, owner).await {
            tracing::warn!(error = %e, "Failed to release thread lease");
        }
    }
}
