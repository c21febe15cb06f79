// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the entrance gateway.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::events::{
    epoch_ms, InteractRequest, ProviderEventPush, TimelinePage, UnifiedUserInput,
};
use crate::ingest::{self, signature};
use crate::state::GatewayState;
use crate::store::DEFAULT_PAGE_LIMIT;
use crate::transport::auth;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub durable: bool,
    pub session_count: usize,
    pub outbox_pending: u64,
    pub outbox_dead_letter: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineQuery {
    pub session_id: String,
    #[serde(default)]
    pub cursor: u64,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PushResults {
    pub results: Vec<crate::events::ProviderEventResult>,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health`
pub async fn health(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    let counts = s.store.outbox_counts();
    Json(HealthResponse {
        status: "running".to_owned(),
        durable: s.store.is_durable(),
        session_count: s.sessions.session_count().await,
        outbox_pending: counts.pending + counts.failed + counts.processing,
        outbox_dead_letter: counts.dead_letter,
    })
}

/// `POST /v0/ingest` — user or channel input. External sources carry the
/// HMAC envelope and are verified against the raw body before parsing.
pub async fn ingest(
    State(s): State<Arc<GatewayState>>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let input: UnifiedUserInput = match serde_json::from_slice(&body) {
        Ok(input) => input,
        Err(e) => {
            s.metrics.ingest_rejected.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return GatewayError::InvalidRequest
                .to_http_response(format!("malformed input: {e}"))
                .into_response();
        }
    };

    if input.is_external() {
        let verified = match s.config.adapter_secret {
            Some(ref secret) => {
                signature::verify_external(secret, &headers, &body, &s.nonces, epoch_ms())
            }
            None => Err(GatewayError::InvalidSignature),
        };
        if let Err(code) = verified {
            s.metrics.ingest_rejected.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return code.to_http_response("signature verification failed").into_response();
        }
    }

    match ingest::handle_ingest(&s, input).await {
        Ok(ack) => Json(ack).into_response(),
        Err(code) => code.to_http_response("ingest failed").into_response(),
    }
}

/// `POST /v0/interact` — user interaction callback.
pub async fn interact(
    State(s): State<Arc<GatewayState>>,
    Json(req): Json<InteractRequest>,
) -> impl IntoResponse {
    match ingest::handle_interact(&s, req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(code) => code.to_http_response("interaction failed").into_response(),
    }
}

/// `POST /v0/events` — bulk out-of-band provider push.
pub async fn push_events(
    State(s): State<Arc<GatewayState>>,
    headers: axum::http::HeaderMap,
    Json(push): Json<ProviderEventPush>,
) -> impl IntoResponse {
    if let Err(code) =
        auth::validate_provider_token(&headers, s.config.provider_context_token.as_deref())
    {
        return code.to_http_response("provider token required").into_response();
    }
    if s.config.provider_context_token.is_some() {
        if let Err(code) = auth::validate_scope(&headers, "events:write") {
            return code.to_http_response("events:write scope required").into_response();
        }
    }

    let results = ingest::handle_push(&s, push).await;
    Json(PushResults { results }).into_response()
}

/// `GET /v0/timeline?sessionId=&cursor=` — cursor-paginated fetch.
pub async fn timeline(
    State(s): State<Arc<GatewayState>>,
    Query(query): Query<TimelineQuery>,
) -> impl IntoResponse {
    if query.session_id.is_empty() {
        return GatewayError::InvalidRequest
            .to_http_response("sessionId is required")
            .into_response();
    }
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(DEFAULT_PAGE_LIMIT);
    let events = s.store.list_events(&query.session_id, query.cursor, limit);
    let next_cursor = events.last().map(|e| e.seq).unwrap_or(query.cursor);
    Json(TimelinePage { session_id: query.session_id, events, next_cursor }).into_response()
}

/// `GET /v0/context/users/{profileRef}` — provider fetches a profile
/// snapshot. Requires the provider token and the `context:read` scope.
pub async fn context(
    State(s): State<Arc<GatewayState>>,
    Path(profile_ref): Path<String>,
    headers: axum::http::HeaderMap,
) -> impl IntoResponse {
    if let Err(code) =
        auth::validate_provider_token(&headers, s.config.provider_context_token.as_deref())
    {
        return code.to_http_response("provider token required").into_response();
    }
    if s.config.provider_context_token.is_some() {
        if let Err(code) = auth::validate_scope(&headers, "context:read") {
            return code.to_http_response("context:read scope required").into_response();
        }
    }

    let snapshot = crate::context::get_or_synthesize(&s.store, &profile_ref, epoch_ms());
    Json(snapshot).into_response()
}

/// `GET /v0/metrics`
pub async fn metrics_json(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(s.metrics.snapshot())
}

/// `GET /metrics`
pub async fn metrics_text(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    s.metrics.render_text()
}

/// `GET /.well-known/uniassist/manifest.json` — manifest of the builtin
/// fallback provider.
pub async fn manifest() -> impl IntoResponse {
    Json(serde_json::json!({
        "schemaVersion": crate::events::SCHEMA_VERSION,
        "providerId": "builtin_chat",
        "name": "UniAssist built-in chat",
        "description": "Fallback conversational provider served by the gateway itself.",
        "capabilities": ["invoke", "interact"],
        "endpoints": {
            "ingest": "/v0/ingest",
            "interact": "/v0/interact",
            "events": "/v0/events",
            "stream": "/v0/stream",
            "timeline": "/v0/timeline",
        },
    }))
}
