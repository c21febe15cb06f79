// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Locally served provider behaviours.
//!
//! Providers without a configured base URL are answered here: the
//! `builtin_chat` fallback, the `plan` data-collection loop, and a generic
//! acknowledgement for everything else. The invoker also reaches for
//! [`fallback_reply`] when an external provider fails.

use crate::events::{CardAction, InteractionEvent, UnifiedUserInput};

/// Render schema for the structured data-collection widget.
const DATA_COLLECTION_SCHEMA_REF: &str = "uniassist://render/data-collection/v1";

/// Immediate events for a locally served invoke.
pub fn invoke(provider_id: &str, input: &UnifiedUserInput) -> Vec<InteractionEvent> {
    match provider_id {
        "builtin_chat" => vec![chat_reply(input.text.as_deref())],
        "plan" => vec![plan_data_collection_request(input.text.as_deref())],
        other => vec![InteractionEvent::AssistantMessage {
            text: format!("The {other} assistant is on it."),
        }],
    }
}

/// Events for a locally served interaction follow-up.
pub fn interact(
    provider_id: &str,
    action_id: &str,
    payload: &serde_json::Value,
) -> Vec<InteractionEvent> {
    match action_id {
        "submit_data_collection" => vec![
            InteractionEvent::ProviderExtension {
                extension_kind: "data_collection_progress".to_owned(),
                render_schema_ref: Some(DATA_COLLECTION_SCHEMA_REF.to_owned()),
                payload: serde_json::json!({ "status": "processing" }),
            },
            InteractionEvent::ProviderExtension {
                extension_kind: "data_collection_result".to_owned(),
                render_schema_ref: Some(DATA_COLLECTION_SCHEMA_REF.to_owned()),
                payload: serde_json::json!({ "status": "done", "values": payload }),
            },
        ],
        _ => vec![InteractionEvent::Ack {
            text: format!("The {provider_id} assistant received your action."),
        }],
    }
}

/// Echoing chat reply used by the fallback provider.
pub fn chat_reply(text: Option<&str>) -> InteractionEvent {
    match text {
        Some(text) => InteractionEvent::AssistantMessage {
            text: format!("You said: \"{text}\". I can help with planning, work, and reminders."),
        },
        None => InteractionEvent::AssistantMessage {
            text: "I can help with planning, work, and reminders.".to_owned(),
        },
    }
}

/// Synthesised apology when a provider dispatch fails.
pub fn fallback_reply(provider_id: &str) -> InteractionEvent {
    InteractionEvent::AssistantMessage {
        text: format!(
            "Sorry, the {provider_id} assistant is unavailable right now. Please try again shortly."
        ),
    }
}

/// Suggestion card offering a fresh session after repeated topic drift.
pub fn new_session_card() -> InteractionEvent {
    InteractionEvent::Card {
        title: "Looks like a new topic".to_owned(),
        body: Some("Start a fresh session to keep the conversation focused?".to_owned()),
        actions: vec![CardAction {
            action_id: "new_session:auto".to_owned(),
            label: "Start new session".to_owned(),
        }],
    }
}

/// Suggestion card offering to switch the preferred provider.
pub fn switch_provider_card(provider_id: &str) -> InteractionEvent {
    InteractionEvent::Card {
        title: format!("Switch to the {provider_id} assistant?"),
        body: Some(format!(
            "The {provider_id} assistant has been a better match for your last messages."
        )),
        actions: vec![CardAction {
            action_id: format!("switch_provider:{provider_id}"),
            label: format!("Use {provider_id}"),
        }],
    }
}

fn plan_data_collection_request(text: Option<&str>) -> InteractionEvent {
    InteractionEvent::ProviderExtension {
        extension_kind: "data_collection_request".to_owned(),
        render_schema_ref: Some(DATA_COLLECTION_SCHEMA_REF.to_owned()),
        payload: serde_json::json!({
            "prompt": "Tell me about the plan you want to make.",
            "seedText": text,
            "dataSchema": {
                "type": "object",
                "required": ["goal"],
                "properties": {
                    "goal": { "type": "string", "title": "Goal" },
                    "dueDate": { "type": "string", "format": "date", "title": "Due date" },
                    "notes": { "type": "string", "title": "Notes" },
                },
            },
            "uiSchema": {
                "order": ["goal", "dueDate", "notes"],
                "submitAction": "submit_data_collection",
            },
        }),
    }
}

#[cfg(test)]
#[path = "builtin_tests.rs"]
mod tests;
