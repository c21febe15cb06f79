// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::test_input;

#[test]
fn chat_invoke_echoes_user_text() {
    let events = invoke("builtin_chat", &test_input("s1", "t1", "hello there"));
    assert_eq!(events.len(), 1);
    match &events[0] {
        InteractionEvent::AssistantMessage { text } => assert!(text.contains("hello there")),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn plan_invoke_requests_data_collection() {
    let events = invoke("plan", &test_input("s1", "t1", "帮我做一个计划"));
    assert_eq!(events.len(), 1);
    match &events[0] {
        InteractionEvent::ProviderExtension { extension_kind, payload, .. } => {
            assert_eq!(extension_kind, "data_collection_request");
            assert!(payload["dataSchema"].is_object());
            assert!(!payload["dataSchema"]["properties"]
                .as_object()
                .map(|m| m.is_empty())
                .unwrap_or(true));
            assert!(payload["uiSchema"].is_object());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn data_collection_submit_yields_progress_then_result() {
    let submitted = serde_json::json!({ "goal": "g", "dueDate": "2026-03-01" });
    let events = interact("plan", "submit_data_collection", &submitted);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].extension_kind(), Some("data_collection_progress"));
    assert_eq!(events[1].extension_kind(), Some("data_collection_result"));
    match &events[1] {
        InteractionEvent::ProviderExtension { payload, .. } => {
            assert_eq!(payload["values"], submitted);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn unknown_action_gets_a_plain_ack() {
    let events = interact("reminder", "snooze", &serde_json::Value::Null);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], InteractionEvent::Ack { .. }));
}

#[test]
fn suggestion_cards_carry_their_actions() {
    match new_session_card() {
        InteractionEvent::Card { actions, .. } => {
            assert_eq!(actions[0].action_id, "new_session:auto");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match switch_provider_card("work") {
        InteractionEvent::Card { actions, .. } => {
            assert_eq!(actions[0].action_id, "switch_provider:work");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
