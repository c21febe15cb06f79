// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn payload(n: u64) -> serde_json::Value {
    serde_json::json!({ "n": n })
}

#[test]
fn append_assigns_monotonic_ids_across_streams() {
    let broker = StreamBroker::new();
    let a = broker.append("s:1", payload(1));
    let b = broker.append("global", payload(1));
    let c = broker.append("s:1", payload(2));
    assert!(a < b && b < c);
    assert_eq!(broker.len("s:1"), 2);
    assert_eq!(broker.len("global"), 1);
}

#[test]
fn range_returns_entries_after_cursor() {
    let broker = StreamBroker::new();
    let first = broker.append("s:1", payload(1));
    broker.append("s:1", payload(2));
    broker.append("s:1", payload(3));

    let tail = broker.range("s:1", first);
    assert_eq!(tail.len(), 2);
    assert!(broker.range("missing", 0).is_empty());
    assert!(broker.is_empty("missing"));
}

#[test]
fn group_read_hands_out_each_entry_once() {
    let broker = StreamBroker::new();
    broker.append("global", payload(1));
    broker.append("global", payload(2));

    let first = broker.read_group("global", "g1", 10, 1_000);
    assert_eq!(first.len(), 2);
    // Unacked but not stale: not re-delivered.
    assert!(broker.read_group("global", "g1", 10, 2_000).is_empty());
    assert_eq!(broker.pending_count("global", "g1"), 2);
}

#[test]
fn acked_entries_are_never_redelivered() {
    let broker = StreamBroker::new();
    let id = broker.append("global", payload(1));

    let read = broker.read_group("global", "g1", 10, 1_000);
    assert_eq!(read.len(), 1);
    broker.ack("global", "g1", id);
    assert_eq!(broker.pending_count("global", "g1"), 0);

    // Far in the future: nothing comes back.
    assert!(broker.read_group("global", "g1", 10, 10_000_000).is_empty());
}

#[test]
fn stale_claims_are_redelivered() {
    let broker = StreamBroker::new();
    broker.append("global", payload(1));

    let first = broker.read_group("global", "g1", 10, 1_000);
    assert_eq!(first.len(), 1);

    // Claim older than the timeout: the entry comes back.
    let redelivered = broker.read_group("global", "g1", 10, 1_000 + 31_000);
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].id, first[0].id);
}

#[test]
fn groups_are_independent() {
    let broker = StreamBroker::new();
    broker.append("global", payload(1));

    assert_eq!(broker.read_group("global", "g1", 10, 1_000).len(), 1);
    assert_eq!(broker.read_group("global", "g2", 10, 1_000).len(), 1);
}

#[tokio::test]
async fn hub_fans_out_per_session() {
    let hub = TimelineHub::new();
    let mut rx1 = hub.subscribe("s1").await;
    let mut rx2 = hub.subscribe("s1").await;
    let mut other = hub.subscribe("s2").await;

    let event = crate::events::TimelineEvent {
        event_id: "e1".to_owned(),
        trace_id: "t1".to_owned(),
        session_id: "s1".to_owned(),
        user_id: "u1".to_owned(),
        provider_id: None,
        run_id: None,
        seq: 1,
        timestamp_ms: 1,
        kind: crate::events::EventKind::Inbound,
        extension_kind: None,
        render_schema_ref: None,
        payload: serde_json::Value::Null,
    };
    hub.publish(&event).await;

    let first = rx1.recv().await.map(|e| e.event_id).unwrap_or_default();
    assert_eq!(first, "e1");
    let second = rx2.recv().await.map(|e| e.event_id).unwrap_or_default();
    assert_eq!(second, "e1");
    assert!(other.try_recv().is_err());
}
