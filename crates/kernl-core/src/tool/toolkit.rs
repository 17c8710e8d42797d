//! Toolkits: named groups of tools resolved per tick

use async_trait::async_trait;

use super::{Context, Tool};

#[async_trait]
pub trait Toolkit: Send + Sync {
    fn id(&self) -> &str;

    /// Tools offered for the current context. Called on every tick, so
    /// dynamic toolkits see context changes immediately.
    async fn tools(&self, ctx: &Context) -> anyhow::Result<Vec<Tool>>;
}

/// Static list of tools
#[derive(Debug, Clone)]
pub struct FunctionToolkit {
    id: String,
    tools: Vec<Tool>,
}

impl FunctionToolkit {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<Tool>) -> Self {
        self.tools.push(tool.into());
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl Toolkit for FunctionToolkit {
    fn id(&self) -> &str {
        &self.id
    }

    async fn tools(&self, _ctx: &Context) -> anyhow::Result<Vec<Tool>> {
        Ok(self.tools.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{FunctionTool, HostedTool, ToolContext};
    use serde_json::Value;

    #[tokio::test]
    async fn test_function_toolkit_lists_tools_in_order() {
        let toolkit = FunctionToolkit::new("basics")
            .with_tool(FunctionTool::new(
                "echo",
                "Echo",
                |_ctx: ToolContext, args: Value| async move { Ok(args) },
            ))
            .with_tool(HostedTool::new("web_search"));

        let tools = toolkit.tools(&Context::default()).await.unwrap();
        let ids: Vec<&str> = tools.iter().map(Tool::id).collect();
        assert_eq!(ids, vec!["echo", "web_search"]);
        assert!(tools[1].is_hosted());
    }
}
