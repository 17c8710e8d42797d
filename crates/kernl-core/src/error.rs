//! Unified error handling for the runtime
//!
//! Tool-level failures never show up here: they are absorbed into the event
//! log as `FAILED` tool results so the model can react. Everything below is
//! fatal to the current execution.

use crate::storage::StoreError;

pub type Result<T, E = KernlError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum KernlError {
    /// The model's final output does not satisfy the agent's response shape.
    #[error("model behavior error: {0}")]
    ModelBehavior(String),

    /// The model call failed or its stream reported an error.
    #[error("model call failed: {0}")]
    ModelCall(String),

    /// Persistence failed. Never retried.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Invalid wiring (duplicate tool ids, unregistered model, ...).
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    /// A toolkit failed to list its tools.
    #[error("toolkit '{toolkit}' failed: {message}")]
    Toolkit { toolkit: String, message: String },

    /// A dynamic instructions generator failed.
    #[error("instructions failed: {0}")]
    Instructions(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    /// Another executor owns this thread id.
    #[error("thread {0} already has an active executor")]
    ThreadBusy(String),

    /// `stream()`/`execute()` re-entered on a thread that is RUNNING.
    #[error("thread {0} is already running")]
    AlreadyRunning(String),

    #[error("tick limit of {limit} exceeded")]
    TickLimit { limit: u32 },

    /// A provider-executed tool reached the local execution path.
    #[error("hosted tool '{0}' cannot be invoked locally")]
    HostedToolInvocation(String),

    /// The execution task panicked or was aborted.
    #[error("execution task failed: {0}")]
    TaskFailed(String),
}

impl KernlError {
    pub fn is_storage(&self) -> bool {
        matches!(self, KernlError::Storage(_))
    }
}
