// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Async dispatch to external providers.
//!
//! Dispatches never block the ingest acknowledgement: each one runs in its
//! own task, retries once, and on failure appends a locally synthesised
//! fallback interaction in the provider's place. Timeline sequencing is
//! preserved because emissions re-take the session lock.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::events::{epoch_ms, InteractionEvent, ProviderRun, UnifiedUserInput};
use crate::ingest;
use crate::session::SessionState;
use crate::state::GatewayState;

use super::builtin;
use super::client::ProviderClient;

/// Transport attempts per dispatch (initial call + retries).
const DISPATCH_ATTEMPTS: u32 = 2;

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    ack: Option<InteractionEvent>,
    #[serde(default, rename = "immediateEvents")]
    immediate_events: Vec<InteractionEvent>,
}

#[derive(Debug, Deserialize)]
struct InteractResponse {
    #[serde(default)]
    events: Vec<InteractionEvent>,
}

/// The context package handed to providers alongside every dispatch.
pub fn context_package(user_id: &str) -> serde_json::Value {
    serde_json::json!({
        "profileRef": user_id,
        "contextPath": format!("/v0/context/users/{user_id}"),
        "scopes": ["context:read"],
    })
}

/// Fire-and-forget invoke of an external provider.
pub fn spawn_invoke(
    state: Arc<GatewayState>,
    entry: Arc<Mutex<SessionState>>,
    input: UnifiedUserInput,
    run: ProviderRun,
    base_url: String,
) {
    tokio::spawn(async move {
        state.metrics.provider_invocations.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "input": input,
            "context": context_package(&run.user_id),
            "run": run,
        });
        let client = ProviderClient::new(base_url, state.providers.timeout());

        match call_with_retry(|| client.invoke(&body)).await {
            Ok(value) => {
                let parsed: InvokeResponse =
                    serde_json::from_value(value).unwrap_or(InvokeResponse {
                        ack: None,
                        immediate_events: Vec::new(),
                    });
                let events: Vec<InteractionEvent> =
                    parsed.ack.into_iter().chain(parsed.immediate_events).collect();
                append_events(&state, &entry, &run, events, "completed").await;
            }
            Err(e) => {
                tracing::warn!(provider_id = %run.provider_id, run_id = %run.run_id, err = %e,
                    "provider invoke failed, emitting fallback");
                state.metrics.provider_failures.fetch_add(1, Ordering::Relaxed);
                state.metrics.provider_fallbacks.fetch_add(1, Ordering::Relaxed);
                append_events(
                    &state,
                    &entry,
                    &run,
                    vec![builtin::fallback_reply(&run.provider_id)],
                    "failed",
                )
                .await;
            }
        }
    });
}

/// Fire-and-forget interaction follow-up to an external provider.
pub fn spawn_interact(
    state: Arc<GatewayState>,
    entry: Arc<Mutex<SessionState>>,
    interaction: serde_json::Value,
    run: ProviderRun,
    base_url: String,
) {
    tokio::spawn(async move {
        state.metrics.provider_invocations.fetch_add(1, Ordering::Relaxed);
        let idempotency_key =
            ProviderRun::interact_idempotency_key(&run.trace_id, &run.run_id);
        let body = serde_json::json!({
            "interaction": interaction,
            "context": context_package(&run.user_id),
            "run": run,
            "idempotencyKey": idempotency_key,
        });
        let client = ProviderClient::new(base_url, state.providers.timeout());

        match call_with_retry(|| client.interact(&body)).await {
            Ok(value) => {
                let parsed: InteractResponse = serde_json::from_value(value)
                    .unwrap_or(InteractResponse { events: Vec::new() });
                append_events(&state, &entry, &run, parsed.events, &run.status).await;
            }
            Err(e) => {
                tracing::warn!(provider_id = %run.provider_id, run_id = %run.run_id, err = %e,
                    "provider interact failed, emitting fallback");
                state.metrics.provider_failures.fetch_add(1, Ordering::Relaxed);
                state.metrics.provider_fallbacks.fetch_add(1, Ordering::Relaxed);
                append_events(
                    &state,
                    &entry,
                    &run,
                    vec![builtin::fallback_reply(&run.provider_id)],
                    "failed",
                )
                .await;
            }
        }
    });
}

async fn call_with_retry<F, Fut>(mut call: F) -> anyhow::Result<serde_json::Value>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<serde_json::Value>>,
{
    let mut last_err = None;
    for attempt in 1..=DISPATCH_ATTEMPTS {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < DISPATCH_ATTEMPTS {
                    tracing::debug!(attempt, err = %e, "provider call failed, retrying");
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("provider dispatch failed")))
}

async fn append_events(
    state: &GatewayState,
    entry: &Arc<Mutex<SessionState>>,
    run: &ProviderRun,
    events: Vec<InteractionEvent>,
    status: &str,
) {
    let mut session = entry.lock().await;
    for interaction in &events {
        if let Err(e) = ingest::emit_interaction(
            state,
            &mut session,
            &run.trace_id,
            Some(&run.provider_id),
            Some(&run.run_id),
            interaction,
        ) {
            tracing::error!(err = %e, "failed to append provider interaction");
        }
    }
    state.store.update_run_status(&run.run_id, status, epoch_ms());
    let snapshot = session.clone();
    drop(session);
    state.store.save_session(&snapshot);
}
