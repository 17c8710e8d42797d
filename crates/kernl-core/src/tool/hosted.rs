//! Provider-executed tools
//!
//! Hosted tools (web search, code interpreter, ...) are declared to the
//! model and run server-side. The engine only ever sees their calls paired
//! with a provider-supplied result in the same response.

use serde_json::Value;

use crate::model::ToolDefinition;

#[derive(Debug, Clone, PartialEq)]
pub struct HostedTool {
    id: String,
    name: String,
    args: Value,
}

impl HostedTool {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            args: Value::Object(serde_json::Map::new()),
        }
    }

    /// Provider-facing name when it differs from the id
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Provider-specific configuration
    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition::Hosted {
            id: self.id.clone(),
            name: self.name.clone(),
            args: self.args.clone(),
        }
    }
}
