// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire contracts for the entrance gateway.
//!
//! Everything that crosses a process boundary lives here: the unified input
//! accepted on `/v0/ingest`, the interaction events providers and the gateway
//! emit, the durable timeline event, routing decisions, and the outbox
//! envelope handed to the stream broker.  External field names are camelCase;
//! discriminants are snake_case.

use serde::{Deserialize, Serialize};

/// Wire schema version accepted and emitted by this gateway.
pub const SCHEMA_VERSION: &str = "v0";

// -- Inbound input ------------------------------------------------------------

/// A single user input from any channel (app, api, external webhook).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedUserInput {
    pub schema_version: String,
    pub trace_id: String,
    pub user_id: String,
    pub session_id: String,
    /// `app`, `api`, or an external channel id (e.g. `wechat`).
    pub source: String,
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl UnifiedUserInput {
    /// Non-app sources must carry the HMAC envelope.
    pub fn is_external(&self) -> bool {
        self.source != "app"
    }
}

// -- Interaction events -------------------------------------------------------

/// An action a client can trigger from a card.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardAction {
    pub action_id: String,
    pub label: String,
}

/// Events rendered on the conversation surface.
///
/// `provider_extension` carries structured sub-typed payloads (data
/// collection, custom widgets); everything else is a fixed shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionEvent {
    Ack {
        text: String,
    },
    AssistantMessage {
        text: String,
    },
    Card {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        actions: Vec<CardAction>,
    },
    RequestClarification {
        prompt: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        options: Vec<String>,
    },
    Error {
        code: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    ProviderExtension {
        extension_kind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        render_schema_ref: Option<String>,
        payload: serde_json::Value,
    },
    Nav {
        target: String,
    },
    Form {
        #[serde(rename = "formId")]
        form_id: String,
        schema: serde_json::Value,
    },
}

impl InteractionEvent {
    /// Structured sub-type, when this is a provider extension.
    pub fn extension_kind(&self) -> Option<&str> {
        match self {
            Self::ProviderExtension { extension_kind, .. } => Some(extension_kind),
            _ => None,
        }
    }

    /// Render schema reference, when carried.
    pub fn render_schema_ref(&self) -> Option<&str> {
        match self {
            Self::ProviderExtension { render_schema_ref, .. } => render_schema_ref.as_deref(),
            _ => None,
        }
    }
}

// -- Timeline events ----------------------------------------------------------

/// Durable event kinds on a session timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Inbound,
    RoutingDecision,
    ProviderRun,
    Interaction,
    UserInteraction,
    DomainEvent,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::RoutingDecision => "routing_decision",
            Self::ProviderRun => "provider_run",
            Self::Interaction => "interaction",
            Self::UserInteraction => "user_interaction",
            Self::DomainEvent => "domain_event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Self::Inbound),
            "routing_decision" => Some(Self::RoutingDecision),
            "provider_run" => Some(Self::ProviderRun),
            "interaction" => Some(Self::Interaction),
            "user_interaction" => Some(Self::UserInteraction),
            "domain_event" => Some(Self::DomainEvent),
            _ => None,
        }
    }
}

/// A single durable, ordered fact within a session.
///
/// `(session_id, seq)` is unique and gapless per session; events are append
/// only and never mutated after the write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub event_id: String,
    pub trace_id: String,
    pub session_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub seq: u64,
    pub timestamp_ms: u64,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_schema_ref: Option<String>,
    pub payload: serde_json::Value,
}

// -- Provider runs ------------------------------------------------------------

/// Execution mode of a provider run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Sync,
    Async,
}

/// Whether the run was routed normally or as the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    Normal,
    Fallback,
}

/// One execution of one provider for one ingest trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRun {
    pub run_id: String,
    pub trace_id: String,
    pub session_id: String,
    pub user_id: String,
    pub provider_id: String,
    pub mode: RunMode,
    pub routing_mode: RoutingMode,
    pub idempotency_key: String,
    pub status: String,
}

impl ProviderRun {
    /// Deterministic invoke idempotency key: same trace + provider, same run.
    pub fn invoke_idempotency_key(trace_id: &str, provider_id: &str) -> String {
        format!("{trace_id}:{provider_id}")
    }

    /// Deterministic interact idempotency key for a follow-up interaction.
    pub fn interact_idempotency_key(trace_id: &str, run_id: &str) -> String {
        format!("{trace_id}:{run_id}:interact")
    }
}

// -- Routing decisions --------------------------------------------------------

/// One scored routing candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingCandidate {
    pub provider_id: String,
    pub score: f64,
    pub reason: String,
    pub requires_clarification: bool,
    pub suggested_mode: RunMode,
}

/// The routing decision embedded in a `routing_decision` timeline event.
///
/// `fallback` is either a provider id or the literal `"none"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub candidates: Vec<RoutingCandidate>,
    pub requires_user_confirmation: bool,
    pub fallback: String,
}

// -- Ingest acknowledgement ---------------------------------------------------

/// Subscription hint handed back on ingest: replay from `cursor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionHint {
    pub session_id: String,
    pub cursor: u64,
}

/// Response of `/v0/ingest`: everything needed to render the turn and to
/// resume streaming just after the current cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAck {
    pub session_id: String,
    pub rotated: bool,
    pub routing: RoutingDecision,
    pub runs: Vec<ProviderRun>,
    /// Interaction events emitted synchronously during this call.
    pub events: Vec<AckEvent>,
    pub subscription: SubscriptionHint,
}

// -- Interaction surface ------------------------------------------------------

/// Request body of `/v0/interact`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractRequest {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// An interaction returned in a call response. Persisted interactions carry
/// their timeline identity; ephemeral acks carry neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckEvent {
    #[serde(flatten)]
    pub interaction: InteractionEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl AckEvent {
    pub fn ephemeral(interaction: InteractionEvent) -> Self {
        Self { interaction, event_id: None, seq: None }
    }

    pub fn persisted(interaction: InteractionEvent, event: &TimelineEvent) -> Self {
        Self { interaction, event_id: Some(event.event_id.clone()), seq: Some(event.seq) }
    }
}

/// Response of `/v0/interact`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractResponse {
    pub session_id: String,
    pub events: Vec<AckEvent>,
    pub cursor: u64,
}

// -- Provider push ------------------------------------------------------------

/// One item of the bulk `/v0/events` push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEventItem {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// `interaction` or `domain_event`.
    #[serde(default = "default_push_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_schema_ref: Option<String>,
    pub payload: serde_json::Value,
}

fn default_push_kind() -> String {
    "interaction".to_owned()
}

/// Request body of `/v0/events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEventPush {
    pub events: Vec<ProviderEventItem>,
}

/// Per-item outcome of a bulk push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEventResult {
    pub index: usize,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::error::ErrorBody>,
}

/// Response of `/v0/timeline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePage {
    pub session_id: String,
    pub events: Vec<TimelineEvent>,
    pub next_cursor: u64,
}

// -- Outbox envelope ----------------------------------------------------------

/// Stream addressing for a dispatched event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRef {
    pub key: String,
    pub global_key: String,
}

/// The payload dispatched to the broker for every timeline event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEnvelope {
    pub schema_version: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub event: TimelineEvent,
    pub stream: StreamRef,
}

impl OutboxEnvelope {
    pub fn new(event: TimelineEvent, stream: StreamRef) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_owned(),
            kind: "timeline_event".to_owned(),
            event,
            stream,
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
