//! Parallel tool fan-out for one tick
//!
//! Every call of a tick runs concurrently. Calls never touch thread state:
//! outcomes are collected (in call order) and handed back to the tick loop,
//! which is the only writer of the log.

use futures::future::join_all;

use crate::error::{KernlError, Result};
use crate::observe::{notify, ObservedEvent, ThreadObserver};
use crate::tool::{Tool, ToolCall, ToolCallState, ToolContext, ToolOutcome, ToolResult, ToolSet};

#[derive(Debug, Default)]
pub(crate) struct Execution {
    /// Completed or failed results, in call order
    pub results: Vec<ToolResult>,
    /// Calls withheld pending approval, in call order
    pub pending: Vec<ToolCall>,
}

pub(crate) async fn execute_calls(
    calls: &[ToolCall],
    tools: &ToolSet,
    base: &ToolContext,
    observer: &dyn ThreadObserver,
) -> Result<Execution> {
    // Provider-executed tools must never reach local execution.
    if let Some(call) = calls
        .iter()
        .find(|call| tools.get(&call.tool_id).is_some_and(Tool::is_hosted))
    {
        return Err(KernlError::HostedToolInvocation(call.tool_id.clone()));
    }

    let outcomes = join_all(calls.iter().map(|call| run_call(call, tools, base))).await;

    let mut execution = Execution::default();
    for (call, outcome) in calls.iter().zip(outcomes) {
        notify(
            observer,
            ObservedEvent::ToolCall {
                tid: base.tid.clone(),
                call_id: call.call_id.clone(),
                tool_id: call.tool_id.clone(),
                state: outcome.state,
                span: base.span.child(),
            },
        );

        match outcome.state {
            ToolCallState::Interruptible => execution.pending.push(call.clone()),
            _ => execution
                .results
                .push(outcome.into_result(call.call_id.clone(), call.tool_id.clone())),
        }
    }
    Ok(execution)
}

async fn run_call(call: &ToolCall, tools: &ToolSet, base: &ToolContext) -> ToolOutcome {
    let Some(tool) = tools.get(&call.tool_id) else {
        tracing::warn!(tool = %call.tool_id, call_id = %call.call_id, "Unknown tool requested");
        return ToolOutcome::failed(format!("Tool '{}' not found", call.tool_id));
    };

    if !tool.is_enabled(&base.context) {
        return ToolOutcome::failed(format!("Tool '{}' is not enabled", call.tool_id));
    }

    let ctx = base
        .clone()
        .with_call_id(call.call_id.clone())
        .with_span(base.span.child());
    tool.invoke(&ctx, &call.arguments).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::observe::NoopObserver;
    use crate::test_support::{echo_tool, RecordingObserver};
    use crate::tool::{Context, FunctionTool, HostedTool};
    use serde_json::{json, Value};

    fn toolset(tools: Vec<Tool>) -> ToolSet {
        ToolSet::merge(vec![("kit".to_string(), tools)]).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_soft() {
        let tools = toolset(vec![echo_tool()]);
        let execution = execute_calls(
            &[ToolCall::new("c1", "missing", "{}")],
            &tools,
            &ToolContext::new(Context::default()),
            &NoopObserver,
        )
        .await
        .unwrap();

        let result = &execution.results[0];
        assert_eq!(result.state, ToolCallState::Failed);
        assert!(result.result.is_none());
        assert!(result.error.as_deref().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_failing_sibling_does_not_stop_others() {
        let slow_ok = FunctionTool::new("slow", "Slow", |_ctx: ToolContext, _args: Value| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(json!("slow done"))
        });
        let broken = FunctionTool::new("broken", "Broken", |_ctx: ToolContext, _args: Value| async move {
            Err::<Value, _>(anyhow::anyhow!("disk full"))
        });
        let tools = toolset(vec![slow_ok.into(), broken.into(), echo_tool()]);
        let observer = RecordingObserver::default();

        let execution = execute_calls(
            &[
                ToolCall::new("c1", "slow", "{}"),
                ToolCall::new("c2", "broken", "{}"),
                ToolCall::new("c3", "echo", r#"{"text":"hi"}"#),
            ],
            &tools,
            &ToolContext::new(Context::default()).with_thread("t1", "ns"),
            &observer,
        )
        .await
        .unwrap();

        let states: Vec<(&str, ToolCallState)> = execution
            .results
            .iter()
            .map(|r| (r.call_id.as_str(), r.state))
            .collect();
        assert_eq!(
            states,
            vec![
                ("c1", ToolCallState::Completed),
                ("c2", ToolCallState::Failed),
                ("c3", ToolCallState::Completed),
            ]
        );
        assert_eq!(observer.names(), vec!["tool.call", "tool.call", "tool.call"]);
    }

    #[tokio::test]
    async fn test_calls_run_concurrently() {
        let sleeper = FunctionTool::new("sleep", "Sleep", |_ctx: ToolContext, _args: Value| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Value::Null)
        });
        let tools = toolset(vec![sleeper.into()]);
        let calls: Vec<ToolCall> = (0..5)
            .map(|i| ToolCall::new(format!("c{}", i), "sleep", ""))
            .collect();

        let started = std::time::Instant::now();
        let execution = execute_calls(&calls, &tools, &ToolContext::new(Context::default()), &NoopObserver)
            .await
            .unwrap();
        assert_eq!(execution.results.len(), 5);
        assert!(started.elapsed() < Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_pending_and_disabled_calls() {
        let guarded = FunctionTool::new("deploy", "Deploy", |_ctx: ToolContext, _args: Value| async move {
            Ok(json!("deployed"))
        })
        .requires_approval_always(true);
        let hidden = FunctionTool::new("hidden", "Hidden", |_ctx: ToolContext, _args: Value| async move {
            Ok(Value::Null)
        })
        .enabled_when(|_ctx: &Context| false);
        let tools = toolset(vec![guarded.into(), hidden.into()]);

        let execution = execute_calls(
            &[
                ToolCall::new("c1", "deploy", "{}"),
                ToolCall::new("c2", "hidden", "{}"),
            ],
            &tools,
            &ToolContext::new(Context::default()),
            &NoopObserver,
        )
        .await
        .unwrap();

        assert_eq!(execution.pending, vec![ToolCall::new("c1", "deploy", "{}")]);
        assert_eq!(execution.results.len(), 1);
        assert_eq!(execution.results[0].state, ToolCallState::Failed);
    }

    #[tokio::test]
    async fn test_hosted_tool_is_fatal() {
        let tools = toolset(vec![HostedTool::new("web_search").into()]);
        let err = execute_calls(
            &[ToolCall::new("h1", "web_search", "{}")],
            &tools,
            &ToolContext::new(Context::default()),
            &NoopObserver,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, KernlError::HostedToolInvocation(ref id) if id == "web_search"));
    }
}
