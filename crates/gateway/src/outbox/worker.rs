// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbox drain loop: claim, dispatch, advance, back off.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rand::Rng;

use crate::events::epoch_ms;
use crate::state::GatewayState;
use crate::store::OutboxRow;

/// Rows claimed per poll by one worker.
const CLAIM_BATCH: usize = 16;
/// First retry delay.
const BACKOFF_BASE_MS: u64 = 500;
/// Retry delay ceiling.
const BACKOFF_MAX_MS: u64 = 30_000;

/// Exponential backoff with ±25% jitter for the given attempt count.
pub fn backoff_delay_ms(attempts: u32) -> u64 {
    let exp = attempts.saturating_sub(1).min(16);
    let base = BACKOFF_MAX_MS.min(BACKOFF_BASE_MS.saturating_mul(1u64 << exp));
    let jitter_span = base / 4;
    if jitter_span == 0 {
        return base;
    }
    let jitter = rand::rng().random_range(0..=jitter_span * 2);
    base - jitter_span + jitter
}

/// Spawn `W` claim-dispatch workers plus the lock watchdog. The returned
/// handles complete once the shutdown token fires; callers join them before
/// touching the claims the workers may still hold.
pub fn spawn_outbox_workers(state: Arc<GatewayState>) -> Vec<tokio::task::JoinHandle<()>> {
    let instance = uuid::Uuid::new_v4().to_string();
    let worker_count = state.config.outbox_workers.max(1);
    let mut handles = Vec::with_capacity(worker_count + 1);
    for i in 0..worker_count {
        let state = Arc::clone(&state);
        let name = format!("outbox-{i}-{instance}");
        handles.push(tokio::spawn(async move {
            worker_loop(state, name).await;
        }));
    }

    let state_watchdog = Arc::clone(&state);
    handles.push(tokio::spawn(async move {
        watchdog_loop(state_watchdog).await;
    }));
    handles
}

async fn worker_loop(state: Arc<GatewayState>, name: String) {
    let mut interval = tokio::time::interval(state.config.outbox_poll_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        loop {
            let claimed = state.store.claim_outbox(epoch_ms(), &name, CLAIM_BATCH);
            if claimed.is_empty() {
                break;
            }
            for row in claimed {
                dispatch_claimed(&state, &row);
            }
            if state.shutdown.is_cancelled() {
                break;
            }
        }
    }
    tracing::debug!(worker = %name, "outbox worker stopped");
}

fn dispatch_claimed(state: &GatewayState, row: &OutboxRow) {
    let now = epoch_ms();
    match super::dispatch_row(state, row) {
        Ok(()) => {
            state.store.mark_delivered(row, now);
            state.metrics.outbox_delivered.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            let dead = row.attempts >= row.max_attempts;
            let next_retry_at = now + backoff_delay_ms(row.attempts);
            state.store.mark_failed(row, &e.to_string(), next_retry_at, dead, now);
            if dead {
                state.metrics.outbox_dead_letters.fetch_add(1, Ordering::Relaxed);
                tracing::error!(event_id = %row.event_id, attempts = row.attempts, err = %e,
                    "outbox row dead-lettered");
            } else {
                state.metrics.outbox_retries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event_id = %row.event_id, attempts = row.attempts, err = %e,
                    "outbox dispatch failed, will retry");
            }
        }
    }
}

/// Re-queue rows whose worker died mid-claim.
async fn watchdog_loop(state: Arc<GatewayState>) {
    let period = std::time::Duration::from_millis(state.config.outbox_visibility_ms.max(1_000) / 2);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let reclaimed = state.store.reclaim_stale(epoch_ms(), state.config.outbox_visibility_ms);
        if reclaimed > 0 {
            tracing::warn!(reclaimed, "reclaimed stale outbox claims");
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
