//! Records and query options exchanged with a `ThreadStore`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::thread::{EventKind, ThreadEvent, ThreadState};
use crate::tool::Context;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Persisted thread metadata (no history)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub tid: String,
    pub namespace: String,
    pub agent_id: String,
    pub model_provider: String,
    pub model_id: String,
    pub context: Context,
    pub state: ThreadState,
    pub tick: u32,
    /// Highest persisted event seq; `None` before the first append
    pub seq: Option<u64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// First-time persistence payload
#[derive(Debug, Clone, PartialEq)]
pub struct NewThread {
    pub tid: String,
    pub namespace: String,
    pub agent_id: String,
    pub model_provider: String,
    pub model_id: String,
    pub context: Context,
    pub state: ThreadState,
    pub tick: u32,
    pub metadata: Map<String, Value>,
}

impl NewThread {
    pub(crate) fn into_record(self, now: DateTime<Utc>) -> ThreadRecord {
        ThreadRecord {
            tid: self.tid,
            namespace: self.namespace,
            agent_id: self.agent_id,
            model_provider: self.model_provider,
            model_id: self.model_id,
            context: self.context,
            state: self.state,
            tick: self.tick,
            seq: None,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadUpdate {
    pub tick: Option<u32>,
    pub state: Option<ThreadState>,
    pub context: Option<Context>,
    pub metadata: Option<Map<String, Value>>,
}

impl ThreadUpdate {
    pub(crate) fn apply(self, record: &mut ThreadRecord, now: DateTime<Utc>) {
        if let Some(tick) = self.tick {
            record.tick = tick;
        }
        if let Some(state) = self.state {
            record.state = state;
        }
        if let Some(context) = self.context {
            record.context = context;
        }
        if let Some(metadata) = self.metadata {
            record.metadata = metadata;
        }
        record.updated_at = now;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryOptions {
    /// Only events with `seq` strictly greater than this
    pub after: Option<u64>,
    pub limit: Option<usize>,
    pub order: SortOrder,
    /// Restrict to these kinds; `None` means all
    pub kinds: Option<Vec<EventKind>>,
}

impl HistoryOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub(crate) fn matches(&self, event: &ThreadEvent) -> bool {
        if self.after.is_some_and(|after| event.seq <= after) {
            return false;
        }
        match &self.kinds {
            Some(kinds) => kinds.contains(&event.kind()),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetOptions {
    /// Load history as well; `None` returns the record only
    pub history: Option<HistoryOptions>,
}

impl GetOptions {
    pub fn with_history() -> Self {
        Self {
            history: Some(HistoryOptions::all()),
        }
    }
}

/// A thread record, optionally with (part of) its history
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSnapshot {
    pub record: ThreadRecord,
    pub history: Vec<ThreadEvent>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadFilter {
    pub namespace: Option<String>,
    pub agent_id: Option<String>,
    pub state: Option<ThreadState>,
}

impl ThreadFilter {
    pub(crate) fn matches(&self, record: &ThreadRecord) -> bool {
        self.namespace.as_ref().map_or(true, |ns| &record.namespace == ns)
            && self.agent_id.as_ref().map_or(true, |a| &record.agent_id == a)
            && self.state.map_or(true, |s| record.state == s)
    }
}

/// Listing options. Ordering is by creation time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListOptions {
    pub filter: ThreadFilter,
    pub order: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}
