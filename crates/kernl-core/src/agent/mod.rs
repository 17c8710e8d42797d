//! Agents: static configuration for a thread
//!
//! An `Agent` bundles identity, instructions, a default model with its
//! settings, toolkits and the response shape. It holds no per-thread state
//! and is shared behind an `Arc`.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::KernlError;
use crate::model::{LanguageModel, ModelSettings};
use crate::tool::{Context, ToolSet, Toolkit};

pub mod output;

pub use output::ResponseShape;

type InstructionsFn = Arc<dyn Fn(Context) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// System instructions, fixed or rendered from the live context
#[derive(Clone)]
pub enum Instructions {
    Static(String),
    Dynamic(InstructionsFn),
}

impl Instructions {
    pub fn dynamic<F, Fut>(render: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Instructions::Dynamic(Arc::new(move |ctx| render(ctx).boxed()))
    }

    pub async fn render(&self, ctx: &Context) -> Result<String, KernlError> {
        match self {
            Instructions::Static(text) => Ok(text.clone()),
            Instructions::Dynamic(render) => render(ctx.clone())
                .await
                .map_err(|e| KernlError::Instructions(e.to_string())),
        }
    }
}

impl Default for Instructions {
    fn default() -> Self {
        Instructions::Static(String::new())
    }
}

impl From<&str> for Instructions {
    fn from(text: &str) -> Self {
        Instructions::Static(text.to_string())
    }
}

impl From<String> for Instructions {
    fn from(text: String) -> Self {
        Instructions::Static(text)
    }
}

impl std::fmt::Debug for Instructions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instructions::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Instructions::Dynamic(_) => write!(f, "Dynamic(..)"),
        }
    }
}

pub struct Agent {
    id: String,
    name: String,
    description: Option<String>,
    instructions: Instructions,
    model: Arc<dyn LanguageModel>,
    settings: ModelSettings,
    toolkits: Vec<Arc<dyn Toolkit>>,
    response: ResponseShape,
}

impl Agent {
    pub fn builder(id: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn model(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn response(&self) -> &ResponseShape {
        &self.response
    }

    pub fn toolkits(&self) -> &[Arc<dyn Toolkit>] {
        &self.toolkits
    }

    pub async fn instructions(&self, ctx: &Context) -> Result<String, KernlError> {
        self.instructions.render(ctx).await
    }

    /// Resolve and merge every toolkit for the given context.
    pub async fn tools(&self, ctx: &Context) -> Result<ToolSet, KernlError> {
        let mut listed = Vec::with_capacity(self.toolkits.len());
        for toolkit in &self.toolkits {
            let tools = toolkit
                .tools(ctx)
                .await
                .map_err(|e| KernlError::Toolkit {
                    toolkit: toolkit.id().to_string(),
                    message: e.to_string(),
                })?;
            listed.push((toolkit.id().to_string(), tools));
        }
        ToolSet::merge(listed)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("model", &format!("{}/{}", self.model.provider(), self.model.model_id()))
            .field("toolkits", &self.toolkits.len())
            .field("response", &self.response)
            .finish()
    }
}

#[derive(Default)]
pub struct AgentBuilder {
    id: String,
    name: Option<String>,
    description: Option<String>,
    instructions: Instructions,
    model: Option<Arc<dyn LanguageModel>>,
    settings: ModelSettings,
    toolkits: Vec<Arc<dyn Toolkit>>,
    response: ResponseShape,
}

impl AgentBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn instructions(mut self, instructions: impl Into<Instructions>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn settings(mut self, settings: ModelSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn toolkit(mut self, toolkit: impl Toolkit + 'static) -> Self {
        self.toolkits.push(Arc::new(toolkit));
        self
    }

    pub fn shared_toolkit(mut self, toolkit: Arc<dyn Toolkit>) -> Self {
        self.toolkits.push(toolkit);
        self
    }

    pub fn response(mut self, shape: ResponseShape) -> Self {
        self.response = shape;
        self
    }

    pub fn build(self) -> Result<Agent, KernlError> {
        if self.id.trim().is_empty() {
            return Err(KernlError::Misconfiguration("agent id is empty".into()));
        }
        let model = self.model.ok_or_else(|| {
            KernlError::Misconfiguration(format!("agent '{}' has no model", self.id))
        })?;

        let mut seen = std::collections::HashSet::new();
        for toolkit in &self.toolkits {
            if !seen.insert(toolkit.id().to_string()) {
                return Err(KernlError::Misconfiguration(format!(
                    "agent '{}' has duplicate toolkit '{}'",
                    self.id,
                    toolkit.id()
                )));
            }
        }

        Ok(Agent {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            description: self.description,
            instructions: self.instructions,
            model,
            settings: self.settings,
            toolkits: self.toolkits,
            response: self.response,
        })
    }
}
