//! Thread persistence
//!
//! `ThreadStore` is the durable owner of the event log across executions.
//! Two backends ship with the crate:
//! - `InMemoryThreadStore` - tokio `RwLock` maps, for tests and local runs
//! - `SqliteThreadStore` - rusqlite via `spawn_blocking`
//!
//! Contract highlights shared by every backend:
//! - `append` is idempotent on `(tid, event.id)`
//! - `history` is always returned in `seq` order, whatever the insert order
//! - a *different* event at an already-used `seq` is a `SeqConflict`
//! - `update` of an unknown tid is `NotFound`
//! - `delete` cascades to events

use std::time::Duration;

use async_trait::async_trait;

#[cfg(test)]
mod contract;
mod database;
mod memory;
mod sqlite;
mod types;

pub use database::{Database, SharedDatabase};
pub use memory::InMemoryThreadStore;
pub use sqlite::SqliteThreadStore;
pub use types::{
    GetOptions, HistoryOptions, ListOptions, NewThread, SortOrder, ThreadFilter, ThreadRecord,
    ThreadSnapshot, ThreadUpdate,
};

use crate::thread::ThreadEvent;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("thread not found: {0}")]
    NotFound(String),

    #[error("thread already exists: {0}")]
    AlreadyExists(String),

    /// Another event already occupies this sequence number.
    #[error("seq {seq} of thread {tid} is already taken by another event")]
    SeqConflict { tid: String, seq: u64 },

    #[error("thread {tid} is leased by {owner}")]
    LeaseHeld { tid: String, owner: String },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Hydrate a thread, optionally with history.
    async fn get(&self, tid: &str, options: &GetOptions) -> Result<Option<ThreadSnapshot>, StoreError>;

    /// Thread records only, no history.
    async fn list(&self, options: &ListOptions) -> Result<Vec<ThreadRecord>, StoreError>;

    /// First-time persistence. A duplicate tid is `AlreadyExists`.
    async fn insert(&self, thread: NewThread) -> Result<ThreadRecord, StoreError>;

    async fn update(&self, tid: &str, update: ThreadUpdate) -> Result<ThreadRecord, StoreError>;

    /// Remove a thread and all of its events. Unknown tids are a no-op.
    async fn delete(&self, tid: &str) -> Result<(), StoreError>;

    async fn history(&self, tid: &str, options: &HistoryOptions) -> Result<Vec<ThreadEvent>, StoreError>;

    /// Persist events atomically. Already-seen event ids are skipped.
    async fn append(&self, events: &[ThreadEvent]) -> Result<(), StoreError>;

    /// Take or renew the writer lease. Succeeds when the lease is free,
    /// expired, or already held by `owner`.
    async fn acquire_lease(&self, tid: &str, owner: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Drop the lease if `owner` holds it.
    async fn release_lease(&self, tid: &str, owner: &str) -> Result<(), StoreError>;
}

/// Apply ordering and limit to events already filtered and sorted ascending.
pub(crate) fn order_events(mut events: Vec<ThreadEvent>, options: &HistoryOptions) -> Vec<ThreadEvent> {
    if options.order == SortOrder::Desc {
        events.reverse();
    }
    if let Some(limit) = options.limit {
        events.truncate(limit);
    }
    events
}
