//! Language model boundary
//!
//! The model is a black-box capability: given a `ModelRequest` it either
//! streams `StreamItem`s terminated by a `finish` item, or returns a single
//! batch `ModelResponse`. Implementors only need `generate`; the default
//! `stream` re-exposes the batch response as a one-shot stream.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parking_lot::RwLock;

pub mod types;

pub use types::{
    FinishReason, Message, MessagePart, ModelItem, ModelRequest, ModelResponse, ModelSettings,
    Reasoning, ResponseFormat, Role, StreamItem, ToolDefinition, Usage,
};

/// Stream of response items for one model call
pub type ModelStream = BoxStream<'static, StreamItem>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name (e.g. "openai")
    fn provider(&self) -> &str;

    /// Provider-specific model id
    fn model_id(&self) -> &str;

    /// Produce a complete response in one call.
    async fn generate(&self, request: ModelRequest) -> anyhow::Result<ModelResponse>;

    /// Stream response items. Providers without native streaming inherit this
    /// adapter, which replays the batch response.
    async fn stream(&self, request: ModelRequest) -> anyhow::Result<ModelStream> {
        let response = self.generate(request).await?;
        Ok(stream::iter(response.into_stream_items()).boxed())
    }
}

/// Registry key for a model: `provider/model_id`
pub fn model_key(provider: &str, model_id: &str) -> String {
    format!("{}/{}", provider, model_id)
}

/// Models available for hydrating persisted threads
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<String, Arc<dyn LanguageModel>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model under its `provider/model_id` key, replacing any
    /// previous registration.
    pub fn register(&self, model: Arc<dyn LanguageModel>) {
        let key = model_key(model.provider(), model.model_id());
        tracing::debug!(model = %key, "Registered model");
        self.models.write().insert(key, model);
    }

    pub fn get(&self, provider: &str, model_id: &str) -> Option<Arc<dyn LanguageModel>> {
        self.models.read().get(&model_key(provider, model_id)).cloned()
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}
