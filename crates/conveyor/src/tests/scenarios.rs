//! End-to-end delivery scenarios through the public consumer API.

use super::harness::{
    consumer, count_kind, drain_events, fast_config, wait_until, HandlerScript, MockStore,
    ScriptedHandler, STALE,
};
use crate::config::ConsumerConfig;
use crate::store::{ReadCursor, StreamStore};
use serde_json::json;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_single_message_single_ack() {
    let store = MockStore::new();
    let handler = ScriptedHandler::new(HandlerScript::Succeed);
    let config = ConsumerConfig {
        batch_size: 1,
        ..fast_config()
    };
    let c = consumer(&store, "c1", "g", &["orders"], &handler, config);
    c.start().await.unwrap();

    let id = store.add_message("orders", json!({"sku": "abc"}));
    assert!(wait_until(WAIT, || !store.ack_calls().is_empty()).await);

    c.stop();
    c.stopped().await;

    assert_eq!(handler.call_count(), 1);
    assert_eq!(store.ack_calls(), vec![("orders".to_string(), vec![id])]);
    assert!(store.pending("orders", "g").is_empty());
}

#[tokio::test]
async fn test_retry_through_stale_reclaim_then_success() {
    let store = MockStore::new();
    let handler = ScriptedHandler::new(HandlerScript::FailFirst(2));
    let c = consumer(&store, "c1", "g", &["orders"], &handler, fast_config());
    let mut events = c.subscribe();
    c.start().await.unwrap();

    let id = store.add_message("orders", json!("retry me"));

    for attempt in 1..=2 {
        assert!(wait_until(WAIT, || handler.calls_for(&id).len() == attempt).await);
        assert!(store.acked_ids().is_empty());
        store.age_pending("orders", "g", &id, STALE);
    }
    assert!(wait_until(WAIT, || store.acked_ids() == vec![id.clone()]).await);

    c.stop();
    c.stopped().await;

    let counts: Vec<u32> = handler.calls_for(&id).iter().map(|c| c.deliver_count).collect();
    assert_eq!(counts, vec![1, 2, 3]);

    let events = drain_events(&mut events);
    assert_eq!(count_kind(&events, "message-error"), 2);
    assert_eq!(count_kind(&events, "message-abandoned"), 0);
}

#[tokio::test]
async fn test_single_delivery_budget_abandons_immediately() {
    let store = MockStore::new();
    let handler = ScriptedHandler::new(HandlerScript::Fail);
    let config = ConsumerConfig {
        max_deliver_times: 1,
        ..fast_config()
    };
    let c = consumer(&store, "c1", "g", &["orders"], &handler, config);
    let mut events = c.subscribe();
    c.start().await.unwrap();

    let id = store.add_message("orders", json!("doomed"));
    assert!(wait_until(WAIT, || store.acked_ids() == vec![id.clone()]).await);

    // Nothing is left to reclaim
    tokio::time::sleep(Duration::from_millis(50)).await;
    c.stop();
    c.stopped().await;

    assert_eq!(handler.call_count(), 1);
    let events = drain_events(&mut events);
    assert_eq!(count_kind(&events, "message-abandoned"), 1);
    assert_eq!(count_kind(&events, "message-error"), 0);
}

#[tokio::test]
async fn test_always_failing_message_abandoned_once() {
    let store = MockStore::new();
    let handler = ScriptedHandler::new(HandlerScript::Fail);
    let c = consumer(&store, "c1", "g", &["orders"], &handler, fast_config());
    let mut events = c.subscribe();
    c.start().await.unwrap();

    let id = store.add_message("orders", json!("never works"));
    for attempt in 1..=2 {
        assert!(wait_until(WAIT, || handler.calls_for(&id).len() == attempt).await);
        store.age_pending("orders", "g", &id, STALE);
    }
    assert!(wait_until(WAIT, || store.acked_ids() == vec![id.clone()]).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    c.stop();
    c.stopped().await;

    assert_eq!(handler.calls_for(&id).len(), 3);
    let events = drain_events(&mut events);
    assert_eq!(count_kind(&events, "message-error"), 2);
    assert_eq!(count_kind(&events, "message-abandoned"), 1);
}

#[tokio::test]
async fn test_missing_payload_reported_not_acked() {
    let store = MockStore::new();
    let handler = ScriptedHandler::new(HandlerScript::Succeed);
    let c = consumer(&store, "c1", "g", &["orders"], &handler, fast_config());
    let mut events = c.subscribe();
    c.start().await.unwrap();

    let bad = store.add_raw("orders", vec![("other".to_string(), "x".to_string())]);
    let good = store.add_message("orders", json!("ok"));
    assert!(wait_until(WAIT, || store.acked_ids() == vec![good.clone()]).await);

    c.stop();
    c.stopped().await;

    assert!(handler.calls_for(&bad).is_empty());
    let pending: Vec<String> = store
        .pending("orders", "g")
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(pending, vec![bad.clone()]);

    let events = drain_events(&mut events);
    let parse_errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            crate::events::ConsumerEvent::Error { raw: Some(raw), .. } => Some(raw.id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(parse_errors, vec![bad]);
}

#[tokio::test]
async fn test_group_members_split_messages() {
    let store = MockStore::new();
    let first = ScriptedHandler::new(HandlerScript::Succeed);
    let second = ScriptedHandler::new(HandlerScript::Succeed);
    let a = consumer(&store, "a", "g", &["orders"], &first, fast_config());
    let b = consumer(&store, "b", "g", &["orders"], &second, fast_config());
    a.start().await.unwrap();
    b.start().await.unwrap();

    store.add_message("orders", json!(1));
    assert!(wait_until(WAIT, || first.call_count() + second.call_count() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    a.stop();
    b.stop();
    a.stopped().await;
    b.stopped().await;

    assert_eq!(first.call_count() + second.call_count(), 1);
}

#[tokio::test]
async fn test_crashed_member_work_reclaimed_after_timeout() {
    let store = MockStore::new();
    store.create_group("orders", "g").await.unwrap();
    let id = store.add_message("orders", json!("orphan"));

    // A member that read the entry and died without acknowledging it
    let cursors = vec![("orders".to_string(), ReadCursor::New)];
    store.read_group("g", "dead", &cursors, 1).await.unwrap();

    let handler = ScriptedHandler::new(HandlerScript::Succeed);
    let c = consumer(&store, "alive", "g", &["orders"], &handler, fast_config());
    c.start().await.unwrap();

    // Not idle long enough yet
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.call_count(), 0);
    assert_eq!(store.pending("orders", "g")[0].consumer, "dead");

    store.age_pending("orders", "g", &id, STALE);
    assert!(wait_until(WAIT, || store.acked_ids() == vec![id.clone()]).await);

    c.stop();
    c.stopped().await;

    let calls = handler.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].deliver_count, 2);
}

#[tokio::test]
async fn test_restart_recovers_own_backlog() {
    let store = MockStore::new();
    store.create_group("orders", "g").await.unwrap();
    store.add_message("orders", json!(1));
    store.add_message("orders", json!(2));
    store.add_message("orders", json!(3));

    // Same consumer id, previous incarnation
    let cursors = vec![("orders".to_string(), ReadCursor::New)];
    store.read_group("g", "c1", &cursors, 10).await.unwrap();

    let handler = ScriptedHandler::new(HandlerScript::Succeed);
    let config = ConsumerConfig {
        batch_size: 2,
        ..fast_config()
    };
    let c = consumer(&store, "c1", "g", &["orders"], &handler, config);
    c.start().await.unwrap();

    assert!(wait_until(WAIT, || store.pending("orders", "g").is_empty()).await);
    c.stop();
    c.stopped().await;

    let mut ids: Vec<String> = handler.calls().into_iter().map(|c| c.id).collect();
    ids.sort();
    assert_eq!(ids, vec!["1-0", "2-0", "3-0"]);
    // Batches of two: one ack call per batch
    assert_eq!(store.ack_calls().len(), 2);
}

#[tokio::test]
async fn test_multiple_topics_ack_separately() {
    let store = MockStore::new();
    let handler = ScriptedHandler::new(HandlerScript::Succeed);
    let c = consumer(&store, "c1", "g", &["a", "b"], &handler, fast_config());
    c.start().await.unwrap();

    store.add_message("a", json!("x"));
    store.add_message("b", json!("y"));
    assert!(wait_until(WAIT, || store.acked_ids().len() == 2).await);

    c.stop();
    c.stopped().await;

    let mut topics: Vec<String> = store.ack_calls().into_iter().map(|(t, _)| t).collect();
    topics.sort();
    assert_eq!(topics, vec!["a", "b"]);
}

#[tokio::test]
async fn test_read_failures_reported_and_survived() {
    let store = MockStore::new();
    let handler = ScriptedHandler::new(HandlerScript::Succeed);
    let c = consumer(&store, "c1", "g", &["orders"], &handler, fast_config());
    let mut events = c.subscribe();
    store.fail_next_reads(3);
    c.start().await.unwrap();

    let id = store.add_message("orders", json!("eventually"));
    assert!(wait_until(WAIT, || store.acked_ids() == vec![id.clone()]).await);

    c.stop();
    c.stopped().await;

    assert_eq!(count_kind(&drain_events(&mut events), "error"), 3);
}
