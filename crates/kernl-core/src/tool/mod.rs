//! Tools and toolkits
//!
//! A `Tool` is either a locally executed `FunctionTool` or a `HostedTool`
//! run server-side by the model provider. Toolkits group tools and are
//! resolved per tick into a `ToolSet`.
//!
//! Invocation never fails: it always yields a tri-state `ToolOutcome`
//! (completed / failed / interruptible).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::KernlError;
use crate::model::ToolDefinition;

pub mod context;
pub mod function;
pub mod hosted;
pub mod source;
pub mod toolkit;

pub use context::{ApprovalDecision, Context, ToolContext};
pub use function::{ApprovalPolicy, ApprovalPredicate, FunctionTool, ToolHandler};
pub use hosted::HostedTool;
pub use source::{SourceToolDef, SourceToolkit, ToolSource};
pub use toolkit::{FunctionToolkit, Toolkit};

/// A tool-call intention extracted from a model response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_id: String,
    /// Opaque JSON-encoded argument string, exactly as produced by the model
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        call_id: impl Into<String>,
        tool_id: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_id: tool_id.into(),
            arguments: arguments.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolCallState {
    Completed,
    Failed,
    /// Pending out-of-band approval; the tool body did not run
    Interruptible,
}

/// Result of a tool invocation, without call identity
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub state: ToolCallState,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn completed(result: Value) -> Self {
        Self {
            state: ToolCallState::Completed,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: ToolCallState::Failed,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn interruptible() -> Self {
        Self {
            state: ToolCallState::Interruptible,
            result: None,
            error: None,
        }
    }

    pub fn into_result(self, call_id: impl Into<String>, tool_id: impl Into<String>) -> ToolResult {
        ToolResult {
            call_id: call_id.into(),
            tool_id: tool_id.into(),
            state: self.state,
            result: self.result,
            error: self.error,
        }
    }
}

/// Tool result as recorded in the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_id: String,
    pub state: ToolCallState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sum type over the two tool kinds. Dispatch happens with a `match` at the
/// call sites (`invoke`, `definition`).
#[derive(Clone)]
pub enum Tool {
    Function(Arc<FunctionTool>),
    Hosted(HostedTool),
}

impl Tool {
    pub fn id(&self) -> &str {
        match self {
            Tool::Function(tool) => tool.id(),
            Tool::Hosted(tool) => tool.id(),
        }
    }

    pub fn is_hosted(&self) -> bool {
        matches!(self, Tool::Hosted(_))
    }

    /// Serialized form handed to the model
    pub fn definition(&self) -> ToolDefinition {
        match self {
            Tool::Function(tool) => tool.definition(),
            Tool::Hosted(tool) => tool.definition(),
        }
    }

    /// Evaluated against the live context on every tick; never cached.
    pub fn is_enabled(&self, ctx: &Context) -> bool {
        match self {
            Tool::Function(tool) => tool.is_enabled(ctx),
            Tool::Hosted(_) => true,
        }
    }

    pub async fn requires_approval(&self, ctx: &Context, args: &Value, call_id: Option<&str>) -> bool {
        match self {
            Tool::Function(tool) => tool.requires_approval(ctx, args, call_id).await,
            Tool::Hosted(_) => false,
        }
    }

    /// Run the tool locally.
    ///
    /// # Panics
    /// Hosted tools are executed by the provider; reaching this path with one
    /// is a programming error.
    pub async fn invoke(&self, ctx: &ToolContext, arguments: &str) -> ToolOutcome {
        match self {
            Tool::Function(tool) => tool.invoke(ctx, arguments).await,
            Tool::Hosted(tool) => panic!(
                "hosted tool '{}' is executed by the model provider, not locally",
                tool.id()
            ),
        }
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tool::Function(tool) => f.debug_tuple("Function").field(&tool.id()).finish(),
            Tool::Hosted(tool) => f.debug_tuple("Hosted").field(&tool.id()).finish(),
        }
    }
}

impl From<FunctionTool> for Tool {
    fn from(tool: FunctionTool) -> Self {
        Tool::Function(Arc::new(tool))
    }
}

impl From<HostedTool> for Tool {
    fn from(tool: HostedTool) -> Self {
        Tool::Hosted(tool)
    }
}

/// Tools merged from all of an agent's toolkits for one tick
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
}

impl ToolSet {
    /// Merge toolkit outputs, rejecting duplicate tool ids across (or within)
    /// toolkits.
    pub fn merge(
        toolkits: impl IntoIterator<Item = (String, Vec<Tool>)>,
    ) -> Result<Self, KernlError> {
        let mut set = ToolSet::default();
        let mut owners: HashMap<String, String> = HashMap::new();

        for (toolkit_id, tools) in toolkits {
            for tool in tools {
                let id = tool.id().to_string();
                if let Some(previous) = owners.get(&id) {
                    return Err(KernlError::Misconfiguration(format!(
                        "duplicate tool id '{}' (toolkits '{}' and '{}')",
                        id, previous, toolkit_id
                    )));
                }
                owners.insert(id.clone(), toolkit_id.clone());
                set.index.insert(id, set.tools.len());
                set.tools.push(tool);
            }
        }

        Ok(set)
    }

    pub fn get(&self, id: &str) -> Option<&Tool> {
        self.index.get(id).map(|&i| &self.tools[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions of the tools enabled for `ctx`, in toolkit order
    pub fn enabled_definitions(&self, ctx: &Context) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|tool| tool.is_enabled(ctx))
            .map(Tool::definition)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> Tool {
        FunctionTool::new("echo", "Echo text", |_ctx: ToolContext, args: Value| async move {
            Ok(args)
        })
        .into()
    }

    #[test]
    fn test_merge_rejects_duplicate_ids() {
        let err = ToolSet::merge(vec![
            ("a".to_string(), vec![echo()]),
            ("b".to_string(), vec![echo()]),
        ])
        .unwrap_err();
        assert!(matches!(err, KernlError::Misconfiguration(ref msg) if msg.contains("echo")));
    }

    #[test]
    fn test_enabled_definitions_follow_context() {
        let gated: Tool = FunctionTool::new("admin", "Admin only", |_ctx: ToolContext, _args: Value| async move {
            Ok(Value::Null)
        })
        .enabled_when(|ctx: &Context| ctx.get("admin") == Some(&json!(true)))
        .into();
        let set = ToolSet::merge(vec![("kit".to_string(), vec![echo(), gated])]).unwrap();

        let names: Vec<String> = set
            .enabled_definitions(&Context::default())
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["echo"]);

        let admin = Context::new(json!({"admin": true}));
        assert_eq!(set.enabled_definitions(&admin).len(), 2);
        assert!(set.get("admin").is_some());
    }

    #[test]
    fn test_tool_state_wire_format() {
        assert_eq!(
            serde_json::to_value(ToolCallState::Interruptible).unwrap(),
            json!("INTERRUPTIBLE")
        );
    }

    #[tokio::test]
    #[should_panic(expected = "hosted tool")]
    async fn test_hosted_tool_never_runs_locally() {
        let tool: Tool = HostedTool::new("web_search").into();
        tool.invoke(&ToolContext::new(Context::default()), "{}").await;
    }
}
