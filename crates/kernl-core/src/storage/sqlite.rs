//! SQLite-backed `ThreadStore`
//!
//! rusqlite is synchronous, so every operation hops onto the blocking pool
//! and holds the connection mutex for its whole duration. Multi-statement
//! operations run in a transaction.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use super::database::{Database, SharedDatabase};
use super::types::{
    GetOptions, HistoryOptions, ListOptions, NewThread, SortOrder, ThreadRecord, ThreadSnapshot,
    ThreadUpdate,
};
use super::{StoreError, ThreadStore};
use crate::thread::{ThreadEvent, ThreadState};

const RECORD_COLUMNS: &str = "t.tid, t.namespace, t.agent_id, t.model_provider, t.model_id,
    t.context, t.state, t.tick,
    (SELECT MAX(e.seq) FROM thread_events e WHERE e.tid = t.tid),
    t.metadata, t.created_at, t.updated_at";

pub struct SqliteThreadStore {
    db: SharedDatabase,
}

impl SqliteThreadStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: db.into_shared(),
        }
    }

    pub fn from_shared(db: SharedDatabase) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::new(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("storage task failed: {}", e)))?
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_record(row: &Row) -> rusqlite::Result<ThreadRecord> {
    let state: String = row.get(6)?;
    let state = ThreadState::parse(&state).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("unknown thread state {}", state).into(),
        )
    })?;
    let tick: i64 = row.get(7)?;
    let seq: Option<i64> = row.get(8)?;

    Ok(ThreadRecord {
        tid: row.get(0)?,
        namespace: row.get(1)?,
        agent_id: row.get(2)?,
        model_provider: row.get(3)?,
        model_id: row.get(4)?,
        context: json_column(row, 5)?,
        state,
        tick: tick as u32,
        seq: seq.map(|s| s as u64),
        metadata: json_column(row, 9)?,
        created_at: parse_timestamp(row, 10)?,
        updated_at: parse_timestamp(row, 11)?,
    })
}

fn map_event(row: &Row) -> rusqlite::Result<ThreadEvent> {
    let seq: i64 = row.get(2)?;
    Ok(ThreadEvent {
        id: row.get(0)?,
        tid: row.get(1)?,
        seq: seq as u64,
        timestamp: parse_timestamp(row, 3)?,
        metadata: json_column(row, 4)?,
        data: json_column(row, 5)?,
    })
}

fn load_record(conn: &Connection, tid: &str) -> Result<Option<ThreadRecord>, StoreError> {
    let sql = format!("SELECT {} FROM threads t WHERE t.tid = ?1", RECORD_COLUMNS);
    Ok(conn.query_row(&sql, [tid], map_record).optional()?)
}

fn thread_exists(conn: &Connection, tid: &str) -> Result<bool, StoreError> {
    Ok(conn
        .query_row("SELECT 1 FROM threads WHERE tid = ?1", [tid], |_| Ok(()))
        .optional()?
        .is_some())
}

fn load_history(conn: &Connection, tid: &str, options: &HistoryOptions) -> Result<Vec<ThreadEvent>, StoreError> {
    let mut sql = String::from(
        "SELECT id, tid, seq, timestamp, metadata, data FROM thread_events WHERE tid = ?",
    );
    let mut values: Vec<SqlValue> = vec![SqlValue::Text(tid.to_string())];

    if let Some(after) = options.after {
        sql.push_str(" AND seq > ?");
        values.push(SqlValue::Integer(after as i64));
    }
    if let Some(kinds) = &options.kinds {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; kinds.len()].join(", ");
        sql.push_str(&format!(" AND kind IN ({})", placeholders));
        values.extend(kinds.iter().map(|k| SqlValue::Text(k.as_str().to_string())));
    }
    sql.push_str(match options.order {
        SortOrder::Asc => " ORDER BY seq ASC",
        SortOrder::Desc => " ORDER BY seq DESC",
    });
    if let Some(limit) = options.limit {
        sql.push_str(" LIMIT ?");
        values.push(SqlValue::Integer(limit as i64));
    }

    let mut stmt = conn.prepare(&sql)?;
    let events = stmt
        .query_map(params_from_iter(values.iter()), map_event)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

#[async_trait]
impl ThreadStore for SqliteThreadStore {
    async fn get(&self, tid: &str, options: &GetOptions) -> Result<Option<ThreadSnapshot>, StoreError> {
        let tid = tid.to_string();
        let history = options.history.clone();
        self.with_db(move |db| {
            let Some(record) = load_record(db.conn(), &tid)? else {
                return Ok(None);
            };
            let history = match history {
                Some(options) => load_history(db.conn(), &tid, &options)?,
                None => Vec::new(),
            };
            Ok(Some(ThreadSnapshot { record, history }))
        })
        .await
    }

    async fn list(&self, options: &ListOptions) -> Result<Vec<ThreadRecord>, StoreError> {
        let options = options.clone();
        self.with_db(move |db| {
            let mut sql = format!("SELECT {} FROM threads t WHERE 1 = 1", RECORD_COLUMNS);
            let mut values: Vec<SqlValue> = Vec::new();

            if let Some(namespace) = &options.filter.namespace {
                sql.push_str(" AND t.namespace = ?");
                values.push(SqlValue::Text(namespace.clone()));
            }
            if let Some(agent_id) = &options.filter.agent_id {
                sql.push_str(" AND t.agent_id = ?");
                values.push(SqlValue::Text(agent_id.clone()));
            }
            if let Some(state) = options.filter.state {
                sql.push_str(" AND t.state = ?");
                values.push(SqlValue::Text(state.as_str().to_string()));
            }
            sql.push_str(match options.order {
                SortOrder::Asc => " ORDER BY t.created_at ASC, t.tid ASC",
                SortOrder::Desc => " ORDER BY t.created_at DESC, t.tid DESC",
            });
            sql.push_str(" LIMIT ? OFFSET ?");
            values.push(SqlValue::Integer(options.limit.map_or(-1, |l| l as i64)));
            values.push(SqlValue::Integer(options.offset as i64));

            let mut stmt = db.conn().prepare(&sql)?;
            let records = stmt
                .query_map(params_from_iter(values.iter()), map_record)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn insert(&self, thread: NewThread) -> Result<ThreadRecord, StoreError> {
        self.with_db(move |db| {
            if thread_exists(db.conn(), &thread.tid)? {
                return Err(StoreError::AlreadyExists(thread.tid));
            }
            let record = thread.into_record(Utc::now());
            db.conn().execute(
                "INSERT INTO threads (tid, namespace, agent_id, model_provider, model_id,
                    context, state, tick, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.tid,
                    record.namespace,
                    record.agent_id,
                    record.model_provider,
                    record.model_id,
                    serde_json::to_string(&record.context)?,
                    record.state.as_str(),
                    record.tick,
                    serde_json::to_string(&record.metadata)?,
                    timestamp(record.created_at),
                    timestamp(record.updated_at),
                ],
            )?;
            tracing::debug!(tid = %record.tid, "Inserted thread");
            Ok(record)
        })
        .await
    }

    async fn update(&self, tid: &str, update: ThreadUpdate) -> Result<ThreadRecord, StoreError> {
        let tid = tid.to_string();
        self.with_db(move |db| {
            let mut record =
                load_record(db.conn(), &tid)?.ok_or_else(|| StoreError::NotFound(tid.clone()))?;
            update.apply(&mut record, Utc::now());

            db.conn().execute(
                "UPDATE threads SET tick = ?2, state = ?3, context = ?4, metadata = ?5, updated_at = ?6
                 WHERE tid = ?1",
                params![
                    tid,
                    record.tick,
                    record.state.as_str(),
                    serde_json::to_string(&record.context)?,
                    serde_json::to_string(&record.metadata)?,
                    timestamp(record.updated_at),
                ],
            )?;
            Ok(record)
        })
        .await
    }

    async fn delete(&self, tid: &str) -> Result<(), StoreError> {
        let tid = tid.to_string();
        self.with_db(move |db| {
            let removed = db.conn().execute("DELETE FROM threads WHERE tid = ?1", [&tid])?;
            if removed > 0 {
                tracing::info!(tid = %tid, "Deleted thread");
            }
            Ok(())
        })
        .await
    }

    async fn history(&self, tid: &str, options: &HistoryOptions) -> Result<Vec<ThreadEvent>, StoreError> {
        let tid = tid.to_string();
        let options = options.clone();
        self.with_db(move |db| load_history(db.conn(), &tid, &options))
            .await
    }

    async fn append(&self, events: &[ThreadEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let events = events.to_vec();
        self.with_db(move |db| {
            let tx = db.conn_mut().transaction()?;
            let mut known: HashSet<String> = HashSet::new();
            let mut written = 0usize;

            for event in &events {
                if !known.contains(&event.tid) {
                    if !thread_exists(&tx, &event.tid)? {
                        return Err(StoreError::NotFound(event.tid.clone()));
                    }
                    known.insert(event.tid.clone());
                }

                let seen = tx
                    .query_row(
                        "SELECT 1 FROM thread_events WHERE tid = ?1 AND id = ?2",
                        params![event.tid, event.id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if seen {
                    continue;
                }

                let holder: Option<String> = tx
                    .query_row(
                        "SELECT id FROM thread_events WHERE tid = ?1 AND seq = ?2",
                        params![event.tid, event.seq as i64],
                        |row| row.get(0),
                    )
                    .optional()?;
                if holder.is_some() {
                    return Err(StoreError::SeqConflict {
                        tid: event.tid.clone(),
                        seq: event.seq,
                    });
                }

                tx.execute(
                    "INSERT INTO thread_events (tid, id, seq, kind, timestamp, metadata, data)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        event.tid,
                        event.id,
                        event.seq as i64,
                        event.kind().as_str(),
                        timestamp(event.timestamp),
                        serde_json::to_string(&event.metadata)?,
                        serde_json::to_string(&event.data)?,
                    ],
                )?;
                written += 1;
            }

            tx.commit()?;
            tracing::trace!(written, "Appended thread events");
            Ok(())
        })
        .await
    }

    async fn acquire_lease(&self, tid: &str, owner: &str, ttl: Duration) -> Result<(), StoreError> {
        let tid = tid.to_string();
        let owner = owner.to_string();
        self.with_db(move |db| {
            let now = Utc::now();
            let ttl = chrono::Duration::from_std(ttl)
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            let claimed = db.conn().execute(
                "UPDATE threads SET lease_owner = ?2, lease_expires_at = ?3
                 WHERE tid = ?1
                   AND (lease_owner IS NULL OR lease_owner = ?2 OR lease_expires_at <= ?4)",
                params![tid, owner, timestamp(now + ttl), timestamp(now)],
            )?;
            if claimed == 1 {
                return Ok(());
            }

            let holder: Option<Option<String>> = db
                .conn()
                .query_row(
                    "SELECT lease_owner FROM threads WHERE tid = ?1",
                    [&tid],
                    |row| row.get(0),
                )
                .optional()?;
            match holder {
                None => Err(StoreError::NotFound(tid)),
                Some(holder) => Err(StoreError::LeaseHeld {
                    tid,
                    owner: holder.unwrap_or_default(),
                }),
            }
        })
        .await
    }

    async fn release_lease(&self, tid: &str, owner: &str) -> Result<(), StoreError> {
        let tid = tid.to_string();
        let owner = owner.to_string();
        self.with_db(move |db| {
            db.conn().execute(
                "UPDATE threads SET lease_owner = NULL, lease_expires_at = NULL
                 WHERE tid = ?1 AND lease_owner = ?2",
                params![tid, owner],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteThreadStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = SqliteThreadStore::open(&temp_dir.path().join("test.db"))
            .expect("Failed to create database");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_contract_insert_update_get() {
        let (store, _temp) = create_test_store();
        contract::insert_update_get(&store).await;
    }

    #[tokio::test]
    async fn test_contract_append_idempotent() {
        let (store, _temp) = create_test_store();
        contract::append_is_idempotent(&store).await;
    }

    #[tokio::test]
    async fn test_contract_out_of_order_append() {
        let (store, _temp) = create_test_store();
        contract::out_of_order_append_reads_in_seq_order(&store).await;
    }

    #[tokio::test]
    async fn test_contract_seq_conflict() {
        let (store, _temp) = create_test_store();
        contract::seq_conflict_rejects_batch(&store).await;
    }

    #[tokio::test]
    async fn test_contract_history_options() {
        let (store, _temp) = create_test_store();
        contract::history_options(&store).await;
    }

    #[tokio::test]
    async fn test_contract_list_filter_and_paging() {
        let (store, _temp) = create_test_store();
        contract::list_filter_and_paging(&store).await;
    }

    #[tokio::test]
    async fn test_contract_delete_cascades() {
        let (store, _temp) = create_test_store();
        contract::delete_cascades(&store).await;
    }

    #[tokio::test]
    async fn test_contract_lease() {
        let (store, _temp) = create_test_store();
        contract::lease_is_exclusive(&store).await;
    }

    #[tokio::test]
    async fn test_event_timestamps_keep_full_precision() {
        use chrono::TimeZone;

        let (store, _temp) = create_test_store();
        store
            .insert(contract::new_thread("t1", "ns", "helper"))
            .await
            .unwrap();
        let mut event = contract::message("t1", 0, "precise");
        event.timestamp = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        store.append(&[event.clone()]).await.unwrap();

        let history = store.history("t1", &HistoryOptions::all()).await.unwrap();
        assert_eq!(history, vec![event]);
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("kernl.db");
        {
            let store = SqliteThreadStore::open(&path).unwrap();
            store
                .insert(contract::new_thread("t1", "ns", "helper"))
                .await
                .unwrap();
            store
                .append(&[contract::message("t1", 0, "persisted")])
                .await
                .unwrap();
        }

        let store = SqliteThreadStore::open(&path).unwrap();
        let snapshot = store
            .get("t1", &GetOptions::with_history())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.record.seq, Some(0));
        assert_eq!(
            snapshot.history[0].as_message().map(|m| m.text()),
            Some("persisted".to_string())
        );
    }
}
