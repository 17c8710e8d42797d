//! Kernl core library
//!
//! Agent-execution runtime: drives the multi-turn model/tool loop for a
//! thread while treating its append-only event log as the source of truth.
//!
//! ## Layout
//! - `thread` - the tick loop, event log, checkpointing, tool fan-out
//! - `storage` - `ThreadStore` contract plus in-memory and SQLite backends
//! - `tool` - function/hosted tools, toolkits, approval and enablement
//! - `agent` - static agent configuration and response shapes
//! - `model` - the language-model boundary
//! - `kernl` - agent registry and single-writer orchestration

pub mod agent;
pub mod config;
pub mod constants;
pub mod error;
pub mod kernl;
pub mod model;
pub mod observe;
pub mod paths;
pub mod storage;
pub mod thread;
pub mod tool;

#[cfg(test)]
pub(crate) mod test_support;

pub use agent::{Agent, AgentBuilder, Instructions, ResponseShape};
pub use config::KernlConfig;
pub use error::{KernlError, Result};
pub use kernl::Kernl;
pub use model::{LanguageModel, ModelItem, ModelRequest, ModelResponse, StreamItem};
pub use storage::{InMemoryThreadStore, SqliteThreadStore, StoreError, ThreadStore};
pub use thread::{
    Thread, ThreadEvent, ThreadOptions, ThreadOutcome, ThreadResult, ThreadState, ThreadStream,
    ThreadStreamEvent,
};
pub use tool::{
    Context, FunctionTool, FunctionToolkit, HostedTool, SourceToolkit, Tool, ToolCall,
    ToolCallState, ToolContext, ToolResult, Toolkit,
};
