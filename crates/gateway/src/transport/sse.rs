// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live subscription endpoint: cursor replay from the event log, then
//! server-sent events as the projector delivers new entries.
//!
//! Delivery to one subscriber is strictly ascending in `seq`. Outbox
//! dispatch does not preserve order, so late entries are parked in a small
//! reorder buffer and flushed once the gap fills. Slow or lagging consumers
//! are disconnected; reconnecting with the last-seen `seq` resumes cleanly.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::GatewayError;
use crate::events::TimelineEvent;
use crate::state::GatewayState;
use crate::store::DEFAULT_PAGE_LIMIT;
use crate::transport::auth;

/// Events buffered per connection before the consumer is dropped.
const CONNECTION_BUFFER: usize = 64;
/// Out-of-order events parked before the connection is dropped.
const REORDER_BUFFER_MAX: usize = 256;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub session_id: String,
    #[serde(default)]
    pub cursor: u64,
    pub token: Option<String>,
}

/// `GET /v0/stream?sessionId=&cursor=` — SSE subscription.
pub async fn stream(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    // EventSource clients cannot set headers, so the token rides the query.
    let query_str = query.token.as_ref().map(|t| format!("token={t}")).unwrap_or_default();
    if auth::validate_query_token(&query_str, state.config.auth_token.as_deref()).is_err() {
        return GatewayError::Unauthorized.to_http_response("unauthorized").into_response();
    }
    if query.session_id.is_empty() {
        return GatewayError::InvalidRequest
            .to_http_response("sessionId is required")
            .into_response();
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(CONNECTION_BUFFER);
    tokio::spawn(run_subscription(state, query.session_id, query.cursor, tx));

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

async fn run_subscription(
    state: Arc<GatewayState>,
    session_id: String,
    cursor: u64,
    tx: tokio::sync::mpsc::Sender<Event>,
) {
    state.metrics.stream_connections.fetch_add(1, Ordering::Relaxed);

    // Subscribe before replaying so nothing falls between the two.
    let mut live = state.hub.subscribe(&session_id).await;
    let mut last = cursor;
    let mut alive = true;

    'replay: loop {
        let page = state.store.list_events(&session_id, last, DEFAULT_PAGE_LIMIT);
        let page_len = page.len();
        for event in page {
            last = event.seq;
            if !send_event(&tx, &event) {
                alive = false;
                break 'replay;
            }
        }
        if page_len < DEFAULT_PAGE_LIMIT {
            break;
        }
    }

    let mut parked: BTreeMap<u64, TimelineEvent> = BTreeMap::new();
    'live: while alive {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = tx.closed() => break,
            received = live.recv() => {
                match received {
                    Ok(event) => {
                        if event.seq <= last {
                            // Duplicate delivery; already sent.
                            continue;
                        }
                        parked.insert(event.seq, event);
                        while let Some(event) = parked.remove(&(last + 1)) {
                            last = event.seq;
                            if !send_event(&tx, &event) {
                                // Buffer full or consumer gone; drop them.
                                break 'live;
                            }
                        }
                        if parked.len() > REORDER_BUFFER_MAX {
                            tracing::warn!(session_id = %session_id,
                                "subscriber reorder buffer overflow, disconnecting");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(session_id = %session_id, skipped,
                            "subscriber lagged behind the hub, disconnecting");
                        break;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    state.metrics.stream_connections.fetch_sub(1, Ordering::Relaxed);
}

/// Push one event to the connection. Returns false when the consumer is gone
/// or its buffer is full (slow-consumer isolation).
fn send_event(tx: &tokio::sync::mpsc::Sender<Event>, event: &TimelineEvent) -> bool {
    let data = match serde_json::to_string(event) {
        Ok(data) => data,
        Err(e) => {
            tracing::error!(err = %e, "unserializable timeline event");
            return true;
        }
    };
    let sse_event = Event::default()
        .id(event.seq.to_string())
        .event("timeline_event")
        .data(data);
    tx.try_send(sse_event).is_ok()
}
