//! Toolkits backed by a remote tool source
//!
//! A `ToolSource` is anything that can list tools and call one by name, such
//! as an MCP server connection. `SourceToolkit` re-lists the source on every
//! tick and exposes each remote tool as a `FunctionTool`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ApprovalPolicy, Context, FunctionTool, Tool, ToolContext, Toolkit};

/// Tool advertised by a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceToolDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema", alias = "input_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[async_trait]
pub trait ToolSource: Send + Sync {
    fn name(&self) -> &str;

    async fn list_tools(&self) -> anyhow::Result<Vec<SourceToolDef>>;

    async fn call_tool(&self, name: &str, args: Value) -> anyhow::Result<Value>;
}

type ToolFilter = Arc<dyn Fn(&SourceToolDef) -> bool + Send + Sync>;

pub struct SourceToolkit {
    id: String,
    source: Arc<dyn ToolSource>,
    prefix: Option<String>,
    filter: Option<ToolFilter>,
    approval: ApprovalPolicy,
}

impl SourceToolkit {
    pub fn new(source: Arc<dyn ToolSource>) -> Self {
        Self {
            id: source.name().to_string(),
            source,
            prefix: None,
            filter: None,
            approval: ApprovalPolicy::Never,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Prefix prepended to every remote tool name, e.g. `github_`
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&SourceToolDef) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Approval policy applied to every tool from this source
    pub fn with_approval(mut self, policy: ApprovalPolicy) -> Self {
        self.approval = policy;
        self
    }

    fn wrap(&self, def: SourceToolDef) -> FunctionTool {
        let id = match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, def.name),
            None => def.name.clone(),
        };
        let description = def
            .description
            .clone()
            .unwrap_or_else(|| format!("{} tool", self.source.name()));
        let source = self.source.clone();
        let remote_name = def.name;

        FunctionTool::new(id, description, move |_ctx: ToolContext, args: Value| {
            let source = source.clone();
            let remote_name = remote_name.clone();
            async move { source.call_tool(&remote_name, args).await }
        })
        .parameters(def.input_schema)
        .approval_policy(self.approval.clone())
    }
}

#[async_trait]
impl Toolkit for SourceToolkit {
    fn id(&self) -> &str {
        &self.id
    }

    async fn tools(&self, _ctx: &Context) -> anyhow::Result<Vec<Tool>> {
        let defs = self.source.list_tools().await?;
        let tools: Vec<Tool> = defs
            .into_iter()
            .filter(|def| self.filter.as_ref().map_or(true, |f| f(def)))
            .map(|def| self.wrap(def).into())
            .collect();

        tracing::debug!(
            source = %self.source.name(),
            count = tools.len(),
            "Listed source tools"
        );
        Ok(tools)
    }
}
