//! Behaviour every `ThreadStore` backend must share. Each backend's test
//! module runs these against its own instance.

use std::time::Duration;

use serde_json::{json, Map};

use super::*;
use crate::model::{Message, ModelItem};
use crate::thread::{EventKind, ThreadEvent, ThreadState};
use crate::tool::{Context, ToolCall};

pub(crate) fn new_thread(tid: &str, namespace: &str, agent_id: &str) -> NewThread {
    NewThread {
        tid: tid.to_string(),
        namespace: namespace.to_string(),
        agent_id: agent_id.to_string(),
        model_provider: "test".to_string(),
        model_id: "scripted".to_string(),
        context: Context::new(json!({"user": "ada"})),
        state: ThreadState::Stopped,
        tick: 0,
        metadata: Map::new(),
    }
}

pub(crate) fn message(tid: &str, seq: u64, text: &str) -> ThreadEvent {
    ThreadEvent::new(tid, seq, ModelItem::Message(Message::user(text)))
}

pub(crate) async fn insert_update_get<S: ThreadStore>(store: &S) {
    let record = store.insert(new_thread("t1", "ns", "helper")).await.unwrap();
    assert_eq!(record.state, ThreadState::Stopped);
    assert_eq!(record.seq, None);

    let err = store.insert(new_thread("t1", "ns", "helper")).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));

    let updated = store
        .update(
            "t1",
            ThreadUpdate {
                tick: Some(2),
                state: Some(ThreadState::Running),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.tick, 2);
    assert_eq!(updated.state, ThreadState::Running);
    assert_eq!(updated.context, Context::new(json!({"user": "ada"})));

    let err = store
        .update("missing", ThreadUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(ref tid) if tid == "missing"));

    store.append(&[message("t1", 0, "hi")]).await.unwrap();
    let snapshot = store
        .get("t1", &GetOptions::with_history())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.record.seq, Some(0));
    assert_eq!(snapshot.history.len(), 1);

    let bare = store.get("t1", &GetOptions::default()).await.unwrap().unwrap();
    assert!(bare.history.is_empty());
    assert!(store.get("missing", &GetOptions::default()).await.unwrap().is_none());
}

pub(crate) async fn append_is_idempotent<S: ThreadStore>(store: &S) {
    store.insert(new_thread("t1", "ns", "helper")).await.unwrap();
    let first = message("t1", 0, "hi");
    let second = message("t1", 1, "again");

    store.append(&[first.clone()]).await.unwrap();
    store.append(&[first.clone(), second.clone()]).await.unwrap();
    store.append(&[second.clone(), second.clone()]).await.unwrap();

    let history = store.history("t1", &HistoryOptions::all()).await.unwrap();
    assert_eq!(history, vec![first, second]);
}

pub(crate) async fn out_of_order_append_reads_in_seq_order<S: ThreadStore>(store: &S) {
    store.insert(new_thread("t1", "ns", "helper")).await.unwrap();
    let events: Vec<ThreadEvent> = (0..5).map(|i| message("t1", i, &format!("m{}", i))).collect();

    store.append(&[events[3].clone(), events[1].clone()]).await.unwrap();
    store.append(&[events[4].clone()]).await.unwrap();
    store.append(&[events[0].clone(), events[2].clone()]).await.unwrap();

    let seqs: Vec<u64> = store
        .history("t1", &HistoryOptions::all())
        .await
        .unwrap()
        .iter()
        .map(|e| e.seq)
        .collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
}

pub(crate) async fn seq_conflict_rejects_batch<S: ThreadStore>(store: &S) {
    store.insert(new_thread("t1", "ns", "helper")).await.unwrap();
    store.append(&[message("t1", 0, "mine")]).await.unwrap();

    let fresh = message("t1", 1, "fine");
    let rival = message("t1", 0, "theirs");
    let err = store.append(&[fresh, rival]).await.unwrap_err();
    assert!(matches!(err, StoreError::SeqConflict { seq: 0, .. }));

    // Nothing from the rejected batch was written.
    let history = store.history("t1", &HistoryOptions::all()).await.unwrap();
    assert_eq!(history.len(), 1);

    let err = store.append(&[message("nope", 0, "x")]).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

pub(crate) async fn history_options<S: ThreadStore>(store: &S) {
    store.insert(new_thread("t1", "ns", "helper")).await.unwrap();
    store
        .append(&[
            message("t1", 0, "hi"),
            ThreadEvent::new("t1", 1, ModelItem::ToolCall(ToolCall::new("c1", "echo", "{}"))),
            message("t1", 2, "bye"),
        ])
        .await
        .unwrap();

    let after = store
        .history(
            "t1",
            &HistoryOptions {
                after: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(after.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);

    let latest = store
        .history(
            "t1",
            &HistoryOptions {
                order: SortOrder::Desc,
                limit: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(latest[0].seq, 2);

    let calls = store
        .history(
            "t1",
            &HistoryOptions {
                kinds: Some(vec![EventKind::ToolCall]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].as_tool_call().map(|c| c.call_id.as_str()), Some("c1"));
}

pub(crate) async fn list_filter_and_paging<S: ThreadStore>(store: &S) {
    for (tid, ns, agent) in [("a", "ns1", "x"), ("b", "ns1", "y"), ("c", "ns2", "x")] {
        store.insert(new_thread(tid, ns, agent)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let ns1 = store
        .list(&ListOptions {
            filter: ThreadFilter {
                namespace: Some("ns1".into()),
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ns1.iter().map(|r| r.tid.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

    let newest = store
        .list(&ListOptions {
            order: SortOrder::Desc,
            limit: Some(2),
            offset: 1,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(newest.iter().map(|r| r.tid.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);

    let by_agent = store
        .list(&ListOptions {
            filter: ThreadFilter {
                agent_id: Some("x".into()),
                state: Some(ThreadState::Stopped),
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_agent.len(), 2);
}

pub(crate) async fn delete_cascades<S: ThreadStore>(store: &S) {
    store.insert(new_thread("t1", "ns", "helper")).await.unwrap();
    store.append(&[message("t1", 0, "hi")]).await.unwrap();

    store.delete("t1").await.unwrap();
    store.delete("t1").await.unwrap();

    assert!(store.get("t1", &GetOptions::default()).await.unwrap().is_none());
    assert!(store
        .history("t1", &HistoryOptions::all())
        .await
        .unwrap()
        .is_empty());

    // The tid is reusable and starts from an empty log.
    store.insert(new_thread("t1", "ns", "helper")).await.unwrap();
    store.append(&[message("t1", 0, "again")]).await.unwrap();
}

pub(crate) async fn lease_is_exclusive<S: ThreadStore>(store: &S) {
    store.insert(new_thread("t1", "ns", "helper")).await.unwrap();
    let ttl = Duration::from_secs(60);

    store.acquire_lease("t1", "w1", ttl).await.unwrap();
    store.acquire_lease("t1", "w1", ttl).await.unwrap();

    let err = store.acquire_lease("t1", "w2", ttl).await.unwrap_err();
    assert!(matches!(err, StoreError::LeaseHeld { ref owner, .. } if owner == "w1"));

    // Releasing someone else's lease does nothing.
    store.release_lease("t1", "w2").await.unwrap();
    assert!(store.acquire_lease("t1", "w2", ttl).await.is_err());

    store.release_lease("t1", "w1").await.unwrap();
    store.acquire_lease("t1", "w2", ttl).await.unwrap();

    // Expired leases can be taken over.
    store.release_lease("t1", "w2").await.unwrap();
    store.acquire_lease("t1", "w3", Duration::from_millis(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    store.acquire_lease("t1", "w4", ttl).await.unwrap();

    let err = store.acquire_lease("missing", "w1", ttl).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}
