// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{test_input, test_state};

fn kinds(state: &GatewayState, session_id: &str) -> Vec<EventKind> {
    state.store.list_events(session_id, 0, 1000).iter().map(|e| e.kind).collect()
}

#[tokio::test]
async fn fallback_turn_produces_four_timeline_events() -> anyhow::Result<()> {
    let state = test_state()?;
    let ack = handle_ingest(&state, test_input("s1", "t1", "hello there"))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    assert_eq!(ack.session_id, "s1");
    assert!(!ack.rotated);
    assert_eq!(ack.routing.fallback, "builtin_chat");
    assert_eq!(ack.runs.len(), 1);
    assert_eq!(ack.runs[0].provider_id, "builtin_chat");
    assert_eq!(ack.runs[0].routing_mode, RoutingMode::Fallback);
    assert_eq!(ack.subscription.cursor, 4);

    assert_eq!(
        kinds(&state, "s1"),
        vec![
            EventKind::Inbound,
            EventKind::RoutingDecision,
            EventKind::ProviderRun,
            EventKind::Interaction,
        ]
    );

    // The closing interaction is an assistant message echoing the user text.
    let events = state.store.list_events("s1", 0, 1000);
    let last = &events[3];
    assert_eq!(last.payload["type"], "assistant_message");
    let text = last.payload["text"].as_str().unwrap_or_default();
    assert!(text.contains("hello there"));
    Ok(())
}

#[tokio::test]
async fn seq_is_gapless_and_events_unique() -> anyhow::Result<()> {
    let state = test_state()?;
    for i in 0..5 {
        handle_ingest(&state, test_input("s1", &format!("t{i}"), "hello there"))
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }

    let events = state.store.list_events("s1", 0, 1000);
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=events.len() as u64).collect::<Vec<_>>());

    let mut ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), events.len());

    // Every event has a matching outbox row.
    for event in &events {
        assert!(state.store.outbox_get(&event.event_id).is_some());
    }
    Ok(())
}

#[tokio::test]
async fn concurrent_ingests_keep_seq_gapless() -> anyhow::Result<()> {
    let state = test_state()?;
    let mut handles = Vec::new();
    for i in 0..8 {
        let state = std::sync::Arc::clone(&state);
        handles.push(tokio::spawn(async move {
            handle_ingest(&state, test_input("s1", &format!("t{i}"), "hello there")).await
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }

    let events = state.store.list_events("s1", 0, 1000);
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=events.len() as u64).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn plan_turn_emits_data_collection_request() -> anyhow::Result<()> {
    let state = test_state()?;
    let ack = handle_ingest(&state, test_input("s2", "t1", "帮我做一个计划"))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    assert_eq!(ack.runs.len(), 1);
    assert_eq!(ack.runs[0].provider_id, "plan");
    assert_eq!(ack.runs[0].routing_mode, RoutingMode::Normal);
    assert_eq!(ack.runs[0].idempotency_key, "t1:plan");

    let events = state.store.list_events("s2", 0, 1000);
    let request = events
        .iter()
        .find(|e| e.extension_kind.as_deref() == Some("data_collection_request"));
    assert!(request.is_some());
    if let Some(request) = request {
        assert_eq!(request.provider_id.as_deref(), Some("plan"));
        assert!(request.payload["payload"]["dataSchema"].is_object());
        assert!(request.payload["payload"]["uiSchema"].is_object());
    }
    Ok(())
}

#[tokio::test]
async fn data_collection_submit_round_trips_values() -> anyhow::Result<()> {
    let state = test_state()?;
    let ack = handle_ingest(&state, test_input("s2", "t1", "帮我做一个计划"))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let run_id = ack.runs[0].run_id.clone();

    let submitted = serde_json::json!({ "goal": "g", "dueDate": "2026-03-01" });
    let resp = handle_interact(
        &state,
        InteractRequest {
            session_id: "s2".to_owned(),
            user_id: None,
            trace_id: None,
            action_id: "submit_data_collection".to_owned(),
            run_id: Some(run_id),
            provider_id: Some("plan".to_owned()),
            payload: Some(submitted.clone()),
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(resp.session_id, "s2");

    let events = state.store.list_events("s2", 0, 1000);
    let progress = events
        .iter()
        .find(|e| e.extension_kind.as_deref() == Some("data_collection_progress"));
    assert!(progress.is_some());
    let result = events
        .iter()
        .find(|e| e.extension_kind.as_deref() == Some("data_collection_result"));
    assert!(result.is_some());
    if let Some(result) = result {
        assert_eq!(result.payload["payload"]["values"], submitted);
    }
    Ok(())
}

#[tokio::test]
async fn rotation_ack_is_first_and_new_session_starts_at_one() -> anyhow::Result<()> {
    let state = test_state()?;
    handle_ingest(&state, test_input("s3", "t1", "hello there"))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    // Age the session past the idle threshold.
    let entry = state.sessions.find(&state.store, "s3").await;
    assert!(entry.is_some());
    if let Some(entry) = entry {
        entry.lock().await.last_activity_at = crate::events::epoch_ms() - 25 * 3_600_000;
    }

    let ack = handle_ingest(&state, test_input("s3", "t2", "hello again"))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert!(ack.rotated);
    assert_ne!(ack.session_id, "s3");

    let first = &ack.events[0];
    assert!(matches!(first.interaction, InteractionEvent::Ack { .. }));
    assert!(first.seq.is_none());

    let events = state.store.list_events(&ack.session_id, 0, 1000);
    assert_eq!(events[0].seq, 1);
    assert_eq!(events[0].kind, EventKind::Inbound);

    // The idle session's log is untouched.
    assert_eq!(state.store.list_events("s3", 0, 1000).len(), 4);
    Ok(())
}

#[tokio::test]
async fn interact_on_unknown_session_is_not_found() -> anyhow::Result<()> {
    let state = test_state()?;
    let err = handle_interact(
        &state,
        InteractRequest {
            session_id: "missing".to_owned(),
            user_id: None,
            trace_id: None,
            action_id: "anything".to_owned(),
            run_id: None,
            provider_id: None,
            payload: None,
        },
    )
    .await
    .err();
    assert_eq!(err, Some(GatewayError::SessionNotFound));
    Ok(())
}

#[tokio::test]
async fn switch_provider_interaction_updates_sticky() -> anyhow::Result<()> {
    let state = test_state()?;
    handle_ingest(&state, test_input("s4", "t1", "plan my week"))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let resp = handle_interact(
        &state,
        InteractRequest {
            session_id: "s4".to_owned(),
            user_id: None,
            trace_id: None,
            action_id: "switch_provider:work".to_owned(),
            run_id: None,
            provider_id: None,
            payload: None,
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let confirmation = resp
        .events
        .iter()
        .find(|e| matches!(e.interaction, InteractionEvent::AssistantMessage { .. }));
    assert!(confirmation.is_some());

    let entry = state.sessions.find(&state.store, "s4").await;
    assert!(entry.is_some());
    if let Some(entry) = entry {
        let session = entry.lock().await;
        assert_eq!(session.sticky_provider_id.as_deref(), Some("work"));
        assert!((session.sticky_score_boost - 0.15).abs() < 1e-9);
    }
    Ok(())
}

#[tokio::test]
async fn new_session_interaction_rotates() -> anyhow::Result<()> {
    let state = test_state()?;
    handle_ingest(&state, test_input("s5", "t1", "hello there"))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let resp = handle_interact(
        &state,
        InteractRequest {
            session_id: "s5".to_owned(),
            user_id: None,
            trace_id: None,
            action_id: "new_session:auto".to_owned(),
            run_id: None,
            provider_id: None,
            payload: None,
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    assert_ne!(resp.session_id, "s5");
    assert_eq!(resp.cursor, 0);
    Ok(())
}

#[tokio::test]
async fn provider_push_reports_per_item_results() -> anyhow::Result<()> {
    let state = test_state()?;
    handle_ingest(&state, test_input("s6", "t1", "hello there"))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let results = handle_push(
        &state,
        ProviderEventPush {
            events: vec![
                ProviderEventItem {
                    session_id: "s6".to_owned(),
                    user_id: None,
                    trace_id: Some("t1".to_owned()),
                    provider_id: "plan".to_owned(),
                    run_id: None,
                    kind: "domain_event".to_owned(),
                    extension_kind: None,
                    render_schema_ref: None,
                    payload: serde_json::json!({ "milestone": "created" }),
                },
                ProviderEventItem {
                    session_id: "missing".to_owned(),
                    user_id: None,
                    trace_id: None,
                    provider_id: "plan".to_owned(),
                    run_id: None,
                    kind: "interaction".to_owned(),
                    extension_kind: None,
                    render_schema_ref: None,
                    payload: serde_json::Value::Null,
                },
                ProviderEventItem {
                    session_id: "s6".to_owned(),
                    user_id: None,
                    trace_id: None,
                    provider_id: "plan".to_owned(),
                    run_id: None,
                    kind: "not_a_kind".to_owned(),
                    extension_kind: None,
                    render_schema_ref: None,
                    payload: serde_json::Value::Null,
                },
            ],
        },
    )
    .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].ok);
    assert!(!results[1].ok);
    assert_eq!(results[1].error.as_ref().map(|e| e.code.as_str()), Some("SESSION_NOT_FOUND"));
    assert!(!results[2].ok);
    assert_eq!(results[2].error.as_ref().map(|e| e.code.as_str()), Some("INVALID_REQUEST"));

    let events = state.store.list_events("s6", 0, 1000);
    let domain = events.iter().find(|e| e.kind == EventKind::DomainEvent);
    assert!(domain.is_some());
    Ok(())
}

#[tokio::test]
async fn invalid_inputs_are_rejected() -> anyhow::Result<()> {
    let state = test_state()?;

    let mut wrong_version = test_input("s7", "t1", "hi");
    wrong_version.schema_version = "v9".to_owned();
    assert_eq!(
        handle_ingest(&state, wrong_version).await.err(),
        Some(GatewayError::InvalidRequest)
    );

    let mut no_user = test_input("s7", "t1", "hi");
    no_user.user_id = String::new();
    assert_eq!(handle_ingest(&state, no_user).await.err(), Some(GatewayError::InvalidRequest));

    // Nothing reached the timeline.
    assert!(state.store.list_events("s7", 0, 1000).is_empty());
    Ok(())
}

#[tokio::test]
async fn switch_suggestion_card_after_two_leading_turns() -> anyhow::Result<()> {
    let state = test_state()?;
    // Establish plan as sticky.
    handle_ingest(&state, test_input("s8", "t1", "plan my goal roadmap"))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    handle_ingest(&state, test_input("s8", "t2", "work task deadline"))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let ack = handle_ingest(&state, test_input("s8", "t3", "work project meeting"))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let card = ack.events.iter().find_map(|e| match &e.interaction {
        InteractionEvent::Card { actions, .. } => {
            actions.iter().find(|a| a.action_id == "switch_provider:work")
        }
        _ => None,
    });
    assert!(card.is_some());
    Ok(())
}
