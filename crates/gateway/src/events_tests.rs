// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn input_round_trips_camel_case() -> anyhow::Result<()> {
    let json = r#"{
        "schemaVersion": "v0",
        "traceId": "t1",
        "userId": "u1",
        "sessionId": "s1",
        "source": "app",
        "timestampMs": 1700000000000,
        "text": "hello there"
    }"#;
    let input: UnifiedUserInput = serde_json::from_str(json)?;
    assert_eq!(input.trace_id, "t1");
    assert_eq!(input.timestamp_ms, 1_700_000_000_000);
    assert!(!input.is_external());

    let back = serde_json::to_value(&input)?;
    assert_eq!(back["sessionId"], "s1");
    // Optional fields stay off the wire when unset.
    assert!(back.get("locale").is_none());
    Ok(())
}

#[test]
fn interaction_events_are_tagged_snake_case() -> anyhow::Result<()> {
    let ev = InteractionEvent::AssistantMessage { text: "hi".to_owned() };
    let v = serde_json::to_value(&ev)?;
    assert_eq!(v["type"], "assistant_message");

    let ext = InteractionEvent::ProviderExtension {
        extension_kind: "data_collection_request".to_owned(),
        render_schema_ref: None,
        payload: serde_json::json!({"dataSchema": {}}),
    };
    let v = serde_json::to_value(&ext)?;
    assert_eq!(v["type"], "provider_extension");
    assert_eq!(v["extensionKind"], "data_collection_request");
    assert_eq!(ext.extension_kind(), Some("data_collection_request"));
    Ok(())
}

#[test]
fn event_kind_string_round_trip() {
    for kind in [
        EventKind::Inbound,
        EventKind::RoutingDecision,
        EventKind::ProviderRun,
        EventKind::Interaction,
        EventKind::UserInteraction,
        EventKind::DomainEvent,
    ] {
        assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(EventKind::parse("bogus"), None);
}

#[test]
fn idempotency_keys_are_deterministic() {
    assert_eq!(ProviderRun::invoke_idempotency_key("t1", "plan"), "t1:plan");
    assert_eq!(ProviderRun::interact_idempotency_key("t1", "r9"), "t1:r9:interact");
}

#[test]
fn envelope_carries_stream_addressing() -> anyhow::Result<()> {
    let event = TimelineEvent {
        event_id: "e1".to_owned(),
        trace_id: "t1".to_owned(),
        session_id: "s1".to_owned(),
        user_id: "u1".to_owned(),
        provider_id: None,
        run_id: None,
        seq: 1,
        timestamp_ms: 1,
        kind: EventKind::Inbound,
        extension_kind: None,
        render_schema_ref: None,
        payload: serde_json::Value::Null,
    };
    let env = OutboxEnvelope::new(
        event,
        StreamRef {
            key: "uniassist:timeline:session:s1".to_owned(),
            global_key: "uniassist:timeline:global".to_owned(),
        },
    );
    let v = serde_json::to_value(&env)?;
    assert_eq!(v["type"], "timeline_event");
    assert_eq!(v["schemaVersion"], "v0");
    assert_eq!(v["stream"]["key"], "uniassist:timeline:session:s1");
    assert_eq!(v["stream"]["globalKey"], "uniassist:timeline:global");
    assert_eq!(v["event"]["eventId"], "e1");
    Ok(())
}
