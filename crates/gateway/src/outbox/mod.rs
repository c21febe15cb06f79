// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transactional outbox writer.
//!
//! Every timeline append creates (or re-queues) exactly one outbox row in
//! the same store transaction. With inline dispatch enabled the row is also
//! pushed to the broker within the call; otherwise the worker picks it up.

pub mod worker;

use std::sync::atomic::Ordering;

use crate::events::{OutboxEnvelope, StreamRef, TimelineEvent};
use crate::state::GatewayState;
use crate::store::{OutboxRow, OutboxStatus};

/// Channel name stamped on timeline outbox rows.
pub const TIMELINE_CHANNEL: &str = "timeline";

/// Append a timeline event together with its outbox row, then dispatch
/// inline when configured.
pub fn append_and_dispatch(state: &GatewayState, event: &TimelineEvent) -> anyhow::Result<OutboxRow> {
    let now = crate::events::epoch_ms();
    let stream = StreamRef {
        key: state.config.session_stream_key(&event.session_id),
        global_key: state.config.stream_global_key.clone(),
    };
    let envelope = OutboxEnvelope::new(event.clone(), stream);
    let payload = serde_json::to_value(&envelope)?;

    let row = state.store.append_event(
        event,
        TIMELINE_CHANNEL,
        &payload,
        state.config.outbox_max_attempts,
        now,
    )?;
    state.metrics.events_appended.fetch_add(1, Ordering::Relaxed);

    if state.config.outbox_inline_dispatch && row.status == OutboxStatus::Pending {
        match dispatch_row(state, &row) {
            Ok(()) => {
                state.store.mark_delivered(&row, now);
                state.metrics.outbox_delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                // The row stays pending; the worker retries it.
                tracing::warn!(event_id = %row.event_id, err = %e, "inline dispatch failed");
            }
        }
    }
    Ok(row)
}

/// Push one outbox row to both its session stream and the global stream.
pub fn dispatch_row(state: &GatewayState, row: &OutboxRow) -> anyhow::Result<()> {
    let envelope: OutboxEnvelope = serde_json::from_value(row.payload.clone())?;
    state.broker.append(&envelope.stream.key, row.payload.clone());
    state.broker.append(&envelope.stream.global_key, row.payload.clone());
    Ok(())
}
