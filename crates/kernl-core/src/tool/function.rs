//! Locally executed function tools
//!
//! `FunctionTool::invoke` is the tool-invocation boundary: it parses the
//! model's argument string, applies the approval gate and runs the body
//! under a timeout with panics caught. Whatever happens, the caller gets a
//! `ToolOutcome` back, never an error.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use super::{ApprovalDecision, Context, ToolContext, ToolOutcome};
use crate::model::ToolDefinition;

/// Tool body
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: ToolContext, args: Value) -> anyhow::Result<Value>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(ToolContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn call(&self, ctx: ToolContext, args: Value) -> anyhow::Result<Value> {
        (self.0)(ctx, args).await
    }
}

/// Async approval gate over the live context and parsed arguments
#[async_trait]
pub trait ApprovalPredicate: Send + Sync {
    async fn requires_approval(&self, ctx: &Context, args: &Value) -> bool;
}

struct FnPredicate<F>(F);

#[async_trait]
impl<F> ApprovalPredicate for FnPredicate<F>
where
    F: Fn(&Context, &Value) -> bool + Send + Sync,
{
    async fn requires_approval(&self, ctx: &Context, args: &Value) -> bool {
        (self.0)(ctx, args)
    }
}

#[derive(Clone, Default)]
pub enum ApprovalPolicy {
    #[default]
    Never,
    Always,
    Predicate(Arc<dyn ApprovalPredicate>),
}

impl std::fmt::Debug for ApprovalPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalPolicy::Never => write!(f, "Never"),
            ApprovalPolicy::Always => write!(f, "Always"),
            ApprovalPolicy::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

type EnabledFn = Arc<dyn Fn(&Context) -> bool + Send + Sync>;
type ErrorFormatter = Arc<dyn Fn(&str, &anyhow::Error) -> String + Send + Sync>;

pub struct FunctionTool {
    id: String,
    description: String,
    parameters: Value,
    handler: Arc<dyn ToolHandler>,
    approval: ApprovalPolicy,
    enabled: Option<EnabledFn>,
    error_formatter: Option<ErrorFormatter>,
    timeout: Option<Duration>,
}

impl FunctionTool {
    pub fn new<F, Fut>(id: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::with_handler(id, description, Arc::new(FnHandler(handler)))
    }

    pub fn with_handler(
        id: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
            handler,
            approval: ApprovalPolicy::Never,
            enabled: None,
            error_formatter: None,
            timeout: None,
        }
    }

    /// JSON schema for the arguments object
    pub fn parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    pub fn requires_approval_always(mut self, required: bool) -> Self {
        self.approval = if required {
            ApprovalPolicy::Always
        } else {
            ApprovalPolicy::Never
        };
        self
    }

    pub fn approval_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Context, &Value) -> bool + Send + Sync + 'static,
    {
        self.approval = ApprovalPolicy::Predicate(Arc::new(FnPredicate(predicate)));
        self
    }

    pub fn approval_policy(mut self, policy: ApprovalPolicy) -> Self {
        self.approval = policy;
        self
    }

    pub fn enabled_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.enabled = Some(Arc::new(predicate));
        self
    }

    /// Replace the default `Tool '<id>' failed: <error>` message
    pub fn format_errors<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&str, &anyhow::Error) -> String + Send + Sync + 'static,
    {
        self.error_formatter = Some(Arc::new(formatter));
        self
    }

    /// Override the execution timeout carried by the `ToolContext`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition::Function {
            name: self.id.clone(),
            description: self.description.clone(),
            input_schema: self.parameters.clone(),
        }
    }

    pub fn is_enabled(&self, ctx: &Context) -> bool {
        self.enabled.as_ref().map_or(true, |enabled| enabled(ctx))
    }

    /// Whether this call must wait for approval. A call id already approved
    /// in the context never does.
    pub async fn requires_approval(&self, ctx: &Context, args: &Value, call_id: Option<&str>) -> bool {
        if call_id.is_some_and(|id| ctx.is_approved(id)) {
            return false;
        }
        match &self.approval {
            ApprovalPolicy::Never => false,
            ApprovalPolicy::Always => true,
            ApprovalPolicy::Predicate(predicate) => predicate.requires_approval(ctx, args).await,
        }
    }

    pub async fn invoke(&self, ctx: &ToolContext, arguments: &str) -> ToolOutcome {
        let args = match parse_arguments(arguments) {
            Ok(args) => args,
            Err(e) => {
                return ToolOutcome::failed(format!(
                    "Invalid arguments for tool '{}': {}",
                    self.id, e
                ))
            }
        };

        let call_id = ctx.call_id.as_deref();
        if let Some(ApprovalDecision::Denied { reason }) =
            call_id.and_then(|id| ctx.context.approval(id))
        {
            return ToolOutcome::failed(match reason {
                Some(reason) => format!("Tool '{}' was denied: {}", self.id, reason),
                None => format!("Tool '{}' was denied", self.id),
            });
        }

        if self.requires_approval(&ctx.context, &args, call_id).await {
            tracing::debug!(tool = %self.id, call_id = ?call_id, "Tool call awaiting approval");
            return ToolOutcome::interruptible();
        }

        let timeout = self.timeout.unwrap_or(ctx.timeout);
        let body = AssertUnwindSafe(self.handler.call(ctx.clone(), args)).catch_unwind();

        match tokio::time::timeout(timeout, body).await {
            Ok(Ok(Ok(value))) => ToolOutcome::completed(value),
            Ok(Ok(Err(err))) => ToolOutcome::failed(self.format_error(&err)),
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(tool = %self.id, panic = %message, "Tool panicked");
                ToolOutcome::failed(format!("Tool '{}' panicked: {}", self.id, message))
            }
            Err(_) => {
                tracing::warn!(
                    tool = %self.id,
                    timeout_secs = timeout.as_secs_f64(),
                    "Tool execution timed out"
                );
                ToolOutcome::failed(format!(
                    "Tool '{}' timed out after {:?}",
                    self.id, timeout
                ))
            }
        }
    }

    fn format_error(&self, err: &anyhow::Error) -> String {
        match &self.error_formatter {
            Some(formatter) => formatter(&self.id, err),
            None => format!("Tool '{}' failed: {}", self.id, err),
        }
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("id", &self.id)
            .field("approval", &self.approval)
            .finish_non_exhaustive()
    }
}

/// Parse the opaque argument string. Models commonly send an empty string
/// for tools without parameters.
fn parse_arguments(arguments: &str) -> serde_json::Result<Value> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(arguments)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
