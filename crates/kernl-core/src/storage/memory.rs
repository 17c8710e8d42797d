//! In-memory `ThreadStore`

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::types::{
    GetOptions, HistoryOptions, ListOptions, NewThread, SortOrder, ThreadRecord, ThreadSnapshot,
    ThreadUpdate,
};
use super::{order_events, StoreError, ThreadStore};
use crate::thread::ThreadEvent;

struct Lease {
    owner: String,
    expires_at: DateTime<Utc>,
}

struct Entry {
    record: ThreadRecord,
    events: BTreeMap<u64, ThreadEvent>,
    ids: HashSet<String>,
    lease: Option<Lease>,
}

impl Entry {
    fn record(&self) -> ThreadRecord {
        let mut record = self.record.clone();
        record.seq = self.events.keys().next_back().copied();
        record
    }

    fn history(&self, options: &HistoryOptions) -> Vec<ThreadEvent> {
        let events = self
            .events
            .values()
            .filter(|e| options.matches(e))
            .cloned()
            .collect();
        order_events(events, options)
    }
}

/// Store backed by process memory. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryThreadStore {
    threads: RwLock<HashMap<String, Entry>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStore for InMemoryThreadStore {
    async fn get(&self, tid: &str, options: &GetOptions) -> Result<Option<ThreadSnapshot>, StoreError> {
        let threads = self.threads.read().await;
        Ok(threads.get(tid).map(|entry| ThreadSnapshot {
            record: entry.record(),
            history: options
                .history
                .as_ref()
                .map(|h| entry.history(h))
                .unwrap_or_default(),
        }))
    }

    async fn list(&self, options: &ListOptions) -> Result<Vec<ThreadRecord>, StoreError> {
        let threads = self.threads.read().await;
        let mut records: Vec<ThreadRecord> = threads
            .values()
            .map(Entry::record)
            .filter(|r| options.filter.matches(r))
            .collect();

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.tid.cmp(&b.tid)));
        if options.order == SortOrder::Desc {
            records.reverse();
        }

        Ok(records
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn insert(&self, thread: NewThread) -> Result<ThreadRecord, StoreError> {
        let mut threads = self.threads.write().await;
        if threads.contains_key(&thread.tid) {
            return Err(StoreError::AlreadyExists(thread.tid));
        }
        let record = thread.into_record(Utc::now());
        threads.insert(
            record.tid.clone(),
            Entry {
                record: record.clone(),
                events: BTreeMap::new(),
                ids: HashSet::new(),
                lease: None,
            },
        );
        Ok(record)
    }

    async fn update(&self, tid: &str, update: ThreadUpdate) -> Result<ThreadRecord, StoreError> {
        let mut threads = self.threads.write().await;
        let entry = threads
            .get_mut(tid)
            .ok_or_else(|| StoreError::NotFound(tid.to_string()))?;
        update.apply(&mut entry.record, Utc::now());
        Ok(entry.record())
    }

    async fn delete(&self, tid: &str) -> Result<(), StoreError> {
        self.threads.write().await.remove(tid);
        Ok(())
    }

    async fn history(&self, tid: &str, options: &HistoryOptions) -> Result<Vec<ThreadEvent>, StoreError> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(tid)
            .map(|entry| entry.history(options))
            .unwrap_or_default())
    }

    async fn append(&self, events: &[ThreadEvent]) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;

        // Validate the whole batch before touching anything.
        let mut pending: Vec<&ThreadEvent> = Vec::with_capacity(events.len());
        let mut batch_ids: HashSet<(&str, &str)> = HashSet::new();
        let mut batch_seqs: HashMap<(&str, u64), &str> = HashMap::new();

        for event in events {
            let entry = threads
                .get(&event.tid)
                .ok_or_else(|| StoreError::NotFound(event.tid.clone()))?;

            if entry.ids.contains(&event.id) || !batch_ids.insert((event.tid.as_str(), event.id.as_str())) {
                continue;
            }

            let taken = entry
                .events
                .get(&event.seq)
                .map(|e| e.id.as_str())
                .or_else(|| batch_seqs.get(&(event.tid.as_str(), event.seq)).copied());
            if taken.is_some_and(|id| id != event.id) {
                return Err(StoreError::SeqConflict {
                    tid: event.tid.clone(),
                    seq: event.seq,
                });
            }

            batch_seqs.insert((event.tid.as_str(), event.seq), event.id.as_str());
            pending.push(event);
        }

        for event in pending {
            if let Some(entry) = threads.get_mut(&event.tid) {
                entry.ids.insert(event.id.clone());
                entry.events.insert(event.seq, event.clone());
            }
        }
        Ok(())
    }

    async fn acquire_lease(&self, tid: &str, owner: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        let entry = threads
            .get_mut(tid)
            .ok_or_else(|| StoreError::NotFound(tid.to_string()))?;

        let now = Utc::now();
        if let Some(lease) = &entry.lease {
            if lease.owner != owner && lease.expires_at > now {
                return Err(StoreError::LeaseHeld {
                    tid: tid.to_string(),
                    owner: lease.owner.clone(),
                });
            }
        }

        let ttl = chrono::Duration::from_std(ttl).map_err(|e| StoreError::Backend(e.to_string()))?;
        entry.lease = Some(Lease {
            owner: owner.to_string(),
            expires_at: now + ttl,
        });
        Ok(())
    }

    async fn release_lease(&self, tid: &str, owner: &str) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        if let Some(entry) = threads.get_mut(tid) {
            if entry.lease.as_ref().is_some_and(|l| l.owner == owner) {
                entry.lease = None;
            }
        }
        Ok(())
    }
}
