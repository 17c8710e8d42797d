//! In-memory event log with an explicit stage/flush split
//!
//! `append` is pure and synchronous: it assigns the next `seq` and stages
//! the event. Flushing staged events is the checkpoint's job, which calls
//! `mark_flushed` only after the store accepted them.

use std::collections::HashSet;

use super::event::{EventData, ThreadEvent};
use crate::tool::ToolCall;

#[derive(Debug, Clone)]
pub struct EventLog {
    tid: String,
    events: Vec<ThreadEvent>,
    next_seq: u64,
    staged: Vec<ThreadEvent>,
}

impl EventLog {
    pub fn new(tid: impl Into<String>) -> Self {
        Self {
            tid: tid.into(),
            events: Vec::new(),
            next_seq: 0,
            staged: Vec::new(),
        }
    }

    /// Rebuild from persisted history. `last_seq` is the store's highest
    /// seq, which may lie beyond a partially loaded `history`.
    pub fn hydrate(tid: impl Into<String>, mut history: Vec<ThreadEvent>, last_seq: Option<u64>) -> Self {
        history.sort_by_key(|e| e.seq);
        let tail = history.last().map(|e| e.seq);
        let next_seq = last_seq.max(tail).map_or(0, |seq| seq + 1);
        Self {
            tid: tid.into(),
            events: history,
            next_seq,
            staged: Vec::new(),
        }
    }

    /// Assign the next seq and stage the event for the next checkpoint.
    pub fn append(&mut self, data: impl Into<EventData>) -> ThreadEvent {
        let event = ThreadEvent::new(self.tid.clone(), self.next_seq, data);
        self.next_seq += 1;
        self.events.push(event.clone());
        self.staged.push(event.clone());
        event
    }

    pub fn events(&self) -> &[ThreadEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Seq of the most recently appended event
    pub fn last_seq(&self) -> Option<u64> {
        self.next_seq.checked_sub(1)
    }

    pub fn staged(&self) -> &[ThreadEvent] {
        &self.staged
    }

    /// Drop the first `count` staged events after a successful flush.
    pub fn mark_flushed(&mut self, count: usize) {
        let count = count.min(self.staged.len());
        self.staged.drain(..count);
    }

    /// Tool calls that have no result yet, in log order
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let answered: HashSet<&str> = self
            .events
            .iter()
            .filter_map(|e| e.as_tool_result().map(|r| r.call_id.as_str()))
            .collect();

        self.events
            .iter()
            .filter_map(ThreadEvent::as_tool_call)
            .filter(|call| !answered.contains(call.call_id.as_str()))
            .cloned()
            .collect()
    }
}
