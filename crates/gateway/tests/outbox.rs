// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the outbox worker and the stream projector.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use uniassist_gateway::broker::spawn_projector;
use uniassist_gateway::config::GatewayConfig;
use uniassist_gateway::events::{epoch_ms, EventKind, OutboxEnvelope, StreamRef, TimelineEvent};
use uniassist_gateway::outbox::worker::spawn_outbox_workers;
use uniassist_gateway::state::GatewayState;
use uniassist_gateway::store::{OutboxRow, OutboxStatus, StoreOrigin};

fn test_state() -> (Arc<GatewayState>, CancellationToken) {
    let shutdown = CancellationToken::new();
    let config = GatewayConfig {
        host: "127.0.0.1".into(),
        port: 0,
        db_path: None,
        auth_token: None,
        adapter_secret: None,
        provider_context_token: None,
        provider_urls: None,
        stream_prefix: "uniassist:timeline".into(),
        stream_global_key: "uniassist:timeline:global".into(),
        outbox_inline_dispatch: false,
        outbox_workers: 2,
        outbox_poll_ms: 20,
        outbox_max_attempts: 12,
        outbox_visibility_ms: 30_000,
        provider_timeout_ms: 1_000,
        session_idle_hours: 24,
    };
    let state = GatewayState::new(config, shutdown.clone())
        .map(Arc::new)
        .expect("failed to build gateway state");
    (state, shutdown)
}

fn timeline_event(session_id: &str, seq: u64, event_id: &str) -> TimelineEvent {
    TimelineEvent {
        event_id: event_id.to_owned(),
        trace_id: "t1".to_owned(),
        session_id: session_id.to_owned(),
        user_id: "u1".to_owned(),
        provider_id: None,
        run_id: None,
        seq,
        timestamp_ms: epoch_ms(),
        kind: EventKind::DomainEvent,
        extension_kind: None,
        render_schema_ref: None,
        payload: serde_json::json!({ "seq": seq }),
    }
}

fn forged_row(state: &GatewayState, event: &TimelineEvent, status: OutboxStatus, attempts: u32) -> OutboxRow {
    let now = epoch_ms();
    let envelope = OutboxEnvelope::new(
        event.clone(),
        StreamRef {
            key: state.config.session_stream_key(&event.session_id),
            global_key: state.config.stream_global_key.clone(),
        },
    );
    OutboxRow {
        id: 0,
        event_id: event.event_id.clone(),
        session_id: event.session_id.clone(),
        channel: "timeline".to_owned(),
        payload: serde_json::to_value(&envelope).unwrap_or_default(),
        status,
        attempts,
        max_attempts: 12,
        last_error: None,
        next_retry_at: now,
        locked_by: None,
        locked_at: None,
        delivered_at: None,
        consumed_at: None,
        consumed_by: None,
        created_at: now,
        updated_at: now,
        origin: StoreOrigin::Memory,
    }
}

async fn wait_for_status(
    state: &GatewayState,
    event_id: &str,
    wanted: OutboxStatus,
) -> OutboxStatus {
    for _ in 0..200 {
        if let Some(row) = state.store.outbox_get(event_id) {
            if row.status == wanted {
                return row.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    state
        .store
        .outbox_get(event_id)
        .map(|r| r.status)
        .unwrap_or(OutboxStatus::Pending)
}

// ── S5: retry, deliver, consume ───────────────────────────────────────

#[tokio::test]
async fn failed_row_is_retried_delivered_and_consumed() {
    let (state, shutdown) = test_state();

    // A previously failed dispatch, due for retry now.
    let event = timeline_event("s5", 1, "e-failed");
    let row = forged_row(&state, &event, OutboxStatus::Failed, 1);
    state.store.outbox_insert(&row).expect("failed to forge outbox row");

    let _background = spawn_outbox_workers(Arc::clone(&state));
    let _projector = spawn_projector(Arc::clone(&state));

    let status = wait_for_status(&state, "e-failed", OutboxStatus::Consumed).await;
    assert_eq!(status, OutboxStatus::Consumed);

    // The entry landed on both streams.
    let session_key = state.config.session_stream_key("s5");
    assert_eq!(state.broker.len(&session_key), 1);
    assert_eq!(state.broker.len(&state.config.stream_global_key), 1);

    let row = state.store.outbox_get("e-failed").expect("row vanished");
    assert!(row.delivered_at.is_some());
    assert!(row.consumed_at.is_some());
    assert!(row.consumed_by.unwrap_or_default().starts_with("projector-"));

    shutdown.cancel();
}

#[tokio::test]
async fn pending_rows_flow_to_consumed_through_the_pipeline() {
    let (state, shutdown) = test_state();
    let _background = spawn_outbox_workers(Arc::clone(&state));
    let _projector = spawn_projector(Arc::clone(&state));

    for seq in 1..=3u64 {
        let event = timeline_event("s6", seq, &format!("e{seq}"));
        let row = forged_row(&state, &event, OutboxStatus::Pending, 0);
        state.store.outbox_insert(&row).expect("failed to insert row");
    }

    for seq in 1..=3u64 {
        let status = wait_for_status(&state, &format!("e{seq}"), OutboxStatus::Consumed).await;
        assert_eq!(status, OutboxStatus::Consumed, "event e{seq}");
    }
    assert_eq!(state.broker.len(&state.config.stream_global_key), 3);

    // Live subscribers saw the projected events.
    shutdown.cancel();
}

// ── dead-lettering ────────────────────────────────────────────────────

#[tokio::test]
async fn undispatchable_row_dead_letters_after_max_attempts() {
    let (state, shutdown) = test_state();

    // A payload the dispatcher cannot parse, one attempt away from the cap.
    let now = epoch_ms();
    let row = OutboxRow {
        id: 0,
        event_id: "e-poison".to_owned(),
        session_id: "s7".to_owned(),
        channel: "timeline".to_owned(),
        payload: serde_json::json!({ "not": "an envelope" }),
        status: OutboxStatus::Failed,
        attempts: 11,
        max_attempts: 12,
        last_error: Some("unparseable".to_owned()),
        next_retry_at: now,
        locked_by: None,
        locked_at: None,
        delivered_at: None,
        consumed_at: None,
        consumed_by: None,
        created_at: now,
        updated_at: now,
        origin: StoreOrigin::Memory,
    };
    state.store.outbox_insert(&row).expect("failed to insert row");

    let _background = spawn_outbox_workers(Arc::clone(&state));

    let status = wait_for_status(&state, "e-poison", OutboxStatus::DeadLetter).await;
    assert_eq!(status, OutboxStatus::DeadLetter);

    let row = state.store.outbox_get("e-poison").expect("row vanished");
    assert_eq!(row.attempts, row.max_attempts);

    // Dead letters are never claimed again.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let row = state.store.outbox_get("e-poison").expect("row vanished");
    assert_eq!(row.status, OutboxStatus::DeadLetter);
    assert_eq!(row.attempts, row.max_attempts);

    shutdown.cancel();
}

// ── projector feeds live subscribers ──────────────────────────────────

#[tokio::test]
async fn projector_publishes_to_the_hub_in_consumed_order() {
    let (state, shutdown) = test_state();
    let mut rx = state.hub.subscribe("s8").await;

    let _background = spawn_outbox_workers(Arc::clone(&state));
    let _projector = spawn_projector(Arc::clone(&state));

    let event = timeline_event("s8", 1, "e-live");
    let row = forged_row(&state, &event, OutboxStatus::Pending, 0);
    state.store.outbox_insert(&row).expect("failed to insert row");

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no live event within deadline")
        .expect("hub channel closed");
    assert_eq!(received.event_id, "e-live");
    assert_eq!(received.seq, 1);

    let status = wait_for_status(&state, "e-live", OutboxStatus::Consumed).await;
    assert_eq!(status, OutboxStatus::Consumed);

    shutdown.cancel();
}
