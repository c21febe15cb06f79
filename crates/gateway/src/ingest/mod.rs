// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ingest pipeline: validate, resolve the session, route, emit the turn's
//! timeline events, and kick off provider dispatches.
//!
//! Emissions happen under the session lock, which serializes `seq`
//! assignment; provider dispatches are spawned after the lock is released so
//! the acknowledgement never waits on a provider.
//!
//! Interaction handling rule: `ack`-type interactions are returned to the
//! caller but never persisted; every other interaction type becomes a
//! timeline event and flows through the outbox.

pub mod signature;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::events::{
    epoch_ms, AckEvent, EventKind, IngestAck, InteractRequest, InteractResponse, InteractionEvent,
    ProviderEventItem, ProviderEventPush, ProviderEventResult, ProviderRun, RoutingMode, RunMode,
    SubscriptionHint, TimelineEvent, UnifiedUserInput, SCHEMA_VERSION,
};
use crate::outbox;
use crate::providers::{builtin, invoker};
use crate::session::routing::{self, FALLBACK_PROVIDER};
use crate::session::SessionState;
use crate::state::GatewayState;

// -- Event emission -----------------------------------------------------------

/// Append one timeline event under the caller-held session lock.
#[allow(clippy::too_many_arguments)]
pub(crate) fn emit_raw(
    state: &GatewayState,
    session: &mut SessionState,
    trace_id: &str,
    kind: EventKind,
    provider_id: Option<&str>,
    run_id: Option<&str>,
    extension_kind: Option<&str>,
    render_schema_ref: Option<&str>,
    payload: serde_json::Value,
) -> anyhow::Result<TimelineEvent> {
    let event = TimelineEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        trace_id: trace_id.to_owned(),
        session_id: session.session_id.clone(),
        user_id: session.user_id.clone(),
        provider_id: provider_id.map(str::to_owned),
        run_id: run_id.map(str::to_owned),
        seq: session.next_seq(),
        timestamp_ms: epoch_ms(),
        kind,
        extension_kind: extension_kind.map(str::to_owned),
        render_schema_ref: render_schema_ref.map(str::to_owned),
        payload,
    };
    outbox::append_and_dispatch(state, &event)?;
    Ok(event)
}

pub(crate) fn emit_kind(
    state: &GatewayState,
    session: &mut SessionState,
    trace_id: &str,
    kind: EventKind,
    provider_id: Option<&str>,
    run_id: Option<&str>,
    payload: serde_json::Value,
) -> anyhow::Result<TimelineEvent> {
    emit_raw(state, session, trace_id, kind, provider_id, run_id, None, None, payload)
}

/// Persist one interaction as a timeline event, promoting its extension
/// sub-type and render schema onto the event row.
pub(crate) fn emit_interaction(
    state: &GatewayState,
    session: &mut SessionState,
    trace_id: &str,
    provider_id: Option<&str>,
    run_id: Option<&str>,
    interaction: &InteractionEvent,
) -> anyhow::Result<TimelineEvent> {
    emit_raw(
        state,
        session,
        trace_id,
        EventKind::Interaction,
        provider_id,
        run_id,
        interaction.extension_kind(),
        interaction.render_schema_ref(),
        serde_json::to_value(interaction)?,
    )
}

/// Route a batch of interactions: acks stay response-only, the rest are
/// appended to the timeline.
fn push_interactions(
    state: &GatewayState,
    session: &mut SessionState,
    trace_id: &str,
    provider_id: Option<&str>,
    run_id: Option<&str>,
    interactions: Vec<InteractionEvent>,
    ack_events: &mut Vec<AckEvent>,
) -> anyhow::Result<()> {
    for interaction in interactions {
        if matches!(interaction, InteractionEvent::Ack { .. }) {
            ack_events.push(AckEvent::ephemeral(interaction));
            continue;
        }
        let event =
            emit_interaction(state, session, trace_id, provider_id, run_id, &interaction)?;
        ack_events.push(AckEvent::persisted(interaction, &event));
    }
    Ok(())
}

fn internal(e: anyhow::Error) -> GatewayError {
    tracing::error!(err = %e, "ingest pipeline failure");
    GatewayError::Internal
}

// -- Ingest -------------------------------------------------------------------

fn validate_input(input: &UnifiedUserInput) -> Result<(), GatewayError> {
    if input.schema_version != SCHEMA_VERSION {
        return Err(GatewayError::InvalidRequest);
    }
    if input.trace_id.is_empty()
        || input.user_id.is_empty()
        || input.session_id.is_empty()
        || input.source.is_empty()
        || input.timestamp_ms == 0
    {
        return Err(GatewayError::InvalidRequest);
    }
    Ok(())
}

/// Handle one unified input end to end and build its acknowledgement.
pub async fn handle_ingest(
    state: &Arc<GatewayState>,
    input: UnifiedUserInput,
) -> Result<IngestAck, GatewayError> {
    validate_input(&input).inspect_err(|_| {
        state.metrics.ingest_rejected.fetch_add(1, Ordering::Relaxed);
    })?;

    let now = epoch_ms();
    let resolved =
        state.sessions.resolve(&state.store, &input.session_id, &input.user_id, now).await;
    let entry = Arc::clone(&resolved.entry);
    let mut session = entry.lock().await;

    let mut ack_events: Vec<AckEvent> = Vec::new();
    let mut runs: Vec<ProviderRun> = Vec::new();
    let mut dispatches: Vec<(ProviderRun, String)> = Vec::new();

    if resolved.rotated {
        state.metrics.sessions_rotated.fetch_add(1, Ordering::Relaxed);
        let previous = resolved.previous_session_id.as_deref().unwrap_or("the previous session");
        ack_events.push(AckEvent::ephemeral(InteractionEvent::Ack {
            text: format!(
                "Started a fresh session: \"{previous}\" had been idle for over {} hours.",
                state.config.session_idle_hours
            ),
        }));
    }

    emit_kind(
        state,
        &mut session,
        &input.trace_id,
        EventKind::Inbound,
        None,
        None,
        serde_json::to_value(&input).map_err(|e| internal(e.into()))?,
    )
    .map_err(internal)?;

    let outcome = routing::apply_turn(&mut session, input.text.as_deref());
    emit_kind(
        state,
        &mut session,
        &input.trace_id,
        EventKind::RoutingDecision,
        None,
        None,
        serde_json::to_value(&outcome.decision).map_err(|e| internal(e.into()))?,
    )
    .map_err(internal)?;

    if outcome.selected.is_empty() {
        let run = state.store.insert_run(&ProviderRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            trace_id: input.trace_id.clone(),
            session_id: session.session_id.clone(),
            user_id: input.user_id.clone(),
            provider_id: FALLBACK_PROVIDER.to_owned(),
            mode: RunMode::Sync,
            routing_mode: RoutingMode::Fallback,
            idempotency_key: ProviderRun::invoke_idempotency_key(
                &input.trace_id,
                FALLBACK_PROVIDER,
            ),
            status: "in-progress".to_owned(),
        });
        emit_kind(
            state,
            &mut session,
            &input.trace_id,
            EventKind::ProviderRun,
            Some(FALLBACK_PROVIDER),
            Some(&run.run_id),
            serde_json::to_value(&run).map_err(|e| internal(e.into()))?,
        )
        .map_err(internal)?;
        ack_events.push(AckEvent::ephemeral(InteractionEvent::Ack {
            text: "No specialised assistant matched; answering directly.".to_owned(),
        }));
        push_interactions(
            state,
            &mut session,
            &input.trace_id,
            Some(FALLBACK_PROVIDER),
            Some(&run.run_id),
            builtin::invoke(FALLBACK_PROVIDER, &input),
            &mut ack_events,
        )
        .map_err(internal)?;
        state.store.update_run_status(&run.run_id, "completed", now);
        runs.push(run);
    } else {
        for candidate in &outcome.selected {
            let run = state.store.insert_run(&ProviderRun {
                run_id: uuid::Uuid::new_v4().to_string(),
                trace_id: input.trace_id.clone(),
                session_id: session.session_id.clone(),
                user_id: input.user_id.clone(),
                provider_id: candidate.provider_id.clone(),
                mode: candidate.suggested_mode,
                routing_mode: RoutingMode::Normal,
                idempotency_key: ProviderRun::invoke_idempotency_key(
                    &input.trace_id,
                    &candidate.provider_id,
                ),
                status: "in-progress".to_owned(),
            });
            emit_kind(
                state,
                &mut session,
                &input.trace_id,
                EventKind::ProviderRun,
                Some(&candidate.provider_id),
                Some(&run.run_id),
                serde_json::to_value(&run).map_err(|e| internal(e.into()))?,
            )
            .map_err(internal)?;
            ack_events.push(AckEvent::ephemeral(InteractionEvent::Ack {
                text: format!("Handing this to the {} assistant.", candidate.provider_id),
            }));

            match state.providers.base_url(&candidate.provider_id) {
                Some(url) => dispatches.push((run.clone(), url.to_owned())),
                None => {
                    push_interactions(
                        state,
                        &mut session,
                        &input.trace_id,
                        Some(&candidate.provider_id),
                        Some(&run.run_id),
                        builtin::invoke(&candidate.provider_id, &input),
                        &mut ack_events,
                    )
                    .map_err(internal)?;
                    state.store.update_run_status(&run.run_id, "completed", now);
                }
            }
            runs.push(run);
        }
    }

    if outcome.suggest_new_session {
        push_interactions(
            state,
            &mut session,
            &input.trace_id,
            None,
            None,
            vec![builtin::new_session_card()],
            &mut ack_events,
        )
        .map_err(internal)?;
    }
    if let Some(ref target) = outcome.suggest_switch_to {
        push_interactions(
            state,
            &mut session,
            &input.trace_id,
            None,
            None,
            vec![builtin::switch_provider_card(target)],
            &mut ack_events,
        )
        .map_err(internal)?;
    }

    let ack = IngestAck {
        session_id: session.session_id.clone(),
        rotated: resolved.rotated,
        routing: outcome.decision,
        runs,
        events: ack_events,
        subscription: SubscriptionHint {
            session_id: session.session_id.clone(),
            cursor: session.seq,
        },
    };

    let snapshot = session.clone();
    drop(session);

    // Session persistence rides a background task; the ack does not wait.
    let persist_state = Arc::clone(state);
    tokio::spawn(async move {
        persist_state.store.save_session(&snapshot);
    });

    for (run, url) in dispatches {
        invoker::spawn_invoke(
            Arc::clone(state),
            Arc::clone(&entry),
            input.clone(),
            run,
            url,
        );
    }

    state.metrics.ingest_accepted.fetch_add(1, Ordering::Relaxed);
    Ok(ack)
}

// -- Interact -----------------------------------------------------------------

/// Handle a user interaction callback (button, form submit, session action).
pub async fn handle_interact(
    state: &Arc<GatewayState>,
    req: InteractRequest,
) -> Result<InteractResponse, GatewayError> {
    if req.session_id.is_empty() || req.action_id.is_empty() {
        return Err(GatewayError::InvalidRequest);
    }
    let entry = state
        .sessions
        .find(&state.store, &req.session_id)
        .await
        .ok_or(GatewayError::SessionNotFound)?;

    let now = epoch_ms();
    let trace_id = req.trace_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut session = entry.lock().await;
    session.last_activity_at = now;
    let user_id = req.user_id.clone().unwrap_or_else(|| session.user_id.clone());
    let mut ack_events: Vec<AckEvent> = Vec::new();

    emit_kind(
        state,
        &mut session,
        &trace_id,
        EventKind::UserInteraction,
        req.provider_id.as_deref(),
        req.run_id.as_deref(),
        serde_json::to_value(&req).map_err(|e| internal(e.into()))?,
    )
    .map_err(internal)?;

    // Explicit new-session request (manual or from the drift suggestion card).
    if req.action_id == "new_session" || req.action_id.starts_with("new_session:") {
        let fresh_entry = state.sessions.rotate(&user_id, now).await;
        let fresh = fresh_entry.lock().await;
        state.metrics.sessions_rotated.fetch_add(1, Ordering::Relaxed);
        ack_events.push(AckEvent::ephemeral(InteractionEvent::Ack {
            text: "Started a new session.".to_owned(),
        }));

        let response = InteractResponse {
            session_id: fresh.session_id.clone(),
            events: ack_events,
            cursor: fresh.seq,
        };
        let old_snapshot = session.clone();
        let fresh_snapshot = fresh.clone();
        drop(fresh);
        drop(session);
        state.store.save_session(&old_snapshot);
        state.store.save_session(&fresh_snapshot);
        return Ok(response);
    }

    if let Some(target) = req.action_id.strip_prefix("switch_provider:") {
        if !routing::is_known_provider(target) {
            return Err(GatewayError::InvalidRequest);
        }
        routing::apply_switch(&mut session, target, now);
        push_interactions(
            state,
            &mut session,
            &trace_id,
            Some(target),
            None,
            vec![InteractionEvent::AssistantMessage {
                text: format!("Okay — the {target} assistant will take it from here."),
            }],
            &mut ack_events,
        )
        .map_err(internal)?;
    } else if let Some(ref provider_id) = req.provider_id {
        // Provider-directed action: forward to the provider's interact surface.
        let run = resolve_run(state, &req, provider_id, &session, &trace_id);
        match state.providers.base_url(provider_id) {
            Some(url) => {
                let url = url.to_owned();
                ack_events.push(AckEvent::ephemeral(InteractionEvent::Ack {
                    text: "Working on it.".to_owned(),
                }));
                let payload =
                    serde_json::to_value(&req).map_err(|e| internal(e.into()))?;
                invoker::spawn_interact(
                    Arc::clone(state),
                    Arc::clone(&entry),
                    payload,
                    run,
                    url,
                );
            }
            None => {
                let payload = req.payload.clone().unwrap_or(serde_json::Value::Null);
                push_interactions(
                    state,
                    &mut session,
                    &trace_id,
                    Some(provider_id),
                    Some(&run.run_id),
                    builtin::interact(provider_id, &req.action_id, &payload),
                    &mut ack_events,
                )
                .map_err(internal)?;
            }
        }
    } else {
        ack_events.push(AckEvent::ephemeral(InteractionEvent::Ack { text: "Got it.".to_owned() }));
    }

    let response = InteractResponse {
        session_id: session.session_id.clone(),
        events: ack_events,
        cursor: session.seq,
    };
    let snapshot = session.clone();
    drop(session);
    let persist_state = Arc::clone(state);
    tokio::spawn(async move {
        persist_state.store.save_session(&snapshot);
    });
    Ok(response)
}

/// Look up the named run, or mint one for an interaction that arrived
/// without a live run (e.g. after a restart).
fn resolve_run(
    state: &GatewayState,
    req: &InteractRequest,
    provider_id: &str,
    session: &SessionState,
    trace_id: &str,
) -> ProviderRun {
    if let Some(ref run_id) = req.run_id {
        if let Some(run) = state.store.get_run(run_id) {
            return run;
        }
    }
    state.store.insert_run(&ProviderRun {
        run_id: req.run_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        trace_id: trace_id.to_owned(),
        session_id: session.session_id.clone(),
        user_id: session.user_id.clone(),
        provider_id: provider_id.to_owned(),
        mode: RunMode::Sync,
        routing_mode: RoutingMode::Normal,
        idempotency_key: ProviderRun::interact_idempotency_key(
            trace_id,
            req.run_id.as_deref().unwrap_or(trace_id),
        ),
        status: "in-progress".to_owned(),
    })
}

// -- Provider push ------------------------------------------------------------

/// Bulk out-of-band event push from providers; each item stands alone.
pub async fn handle_push(
    state: &Arc<GatewayState>,
    push: ProviderEventPush,
) -> Vec<ProviderEventResult> {
    let mut results = Vec::with_capacity(push.events.len());
    for (index, item) in push.events.into_iter().enumerate() {
        match push_one(state, &item).await {
            Ok(event_id) => {
                results.push(ProviderEventResult { index, ok: true, event_id: Some(event_id), error: None });
            }
            Err(e) => {
                results.push(ProviderEventResult {
                    index,
                    ok: false,
                    event_id: None,
                    error: Some(e.to_error_body(format!("event {index} rejected"))),
                });
            }
        }
    }
    results
}

async fn push_one(
    state: &Arc<GatewayState>,
    item: &ProviderEventItem,
) -> Result<String, GatewayError> {
    let kind = match item.kind.as_str() {
        "interaction" => EventKind::Interaction,
        "domain_event" => EventKind::DomainEvent,
        _ => return Err(GatewayError::InvalidRequest),
    };
    if item.session_id.is_empty() || item.provider_id.is_empty() {
        return Err(GatewayError::InvalidRequest);
    }
    let entry = state
        .sessions
        .find(&state.store, &item.session_id)
        .await
        .ok_or(GatewayError::SessionNotFound)?;

    let mut session = entry.lock().await;
    let trace_id = item.trace_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let event = emit_raw(
        state,
        &mut session,
        &trace_id,
        kind,
        Some(&item.provider_id),
        item.run_id.as_deref(),
        item.extension_kind.as_deref(),
        item.render_schema_ref.as_deref(),
        item.payload.clone(),
    )
    .map_err(internal)?;
    let snapshot = session.clone();
    drop(session);
    state.store.save_session(&snapshot);
    Ok(event.event_id)
}

#[cfg(test)]
#[path = "ingest_tests.rs"]
mod tests;
