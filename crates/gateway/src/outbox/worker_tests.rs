// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{test_input, test_state};

// ── backoff ───────────────────────────────────────────────────────────

#[test]
fn backoff_grows_exponentially_within_jitter() {
    for (attempts, base) in [(1u32, 500u64), (2, 1_000), (3, 2_000), (4, 4_000), (5, 8_000)] {
        for _ in 0..50 {
            let delay = backoff_delay_ms(attempts);
            assert!(delay >= base - base / 4, "attempt {attempts}: {delay} < lower bound");
            assert!(delay <= base + base / 4, "attempt {attempts}: {delay} > upper bound");
        }
    }
}

#[test]
fn backoff_is_capped() {
    for attempts in [10u32, 12, 30, 200] {
        let delay = backoff_delay_ms(attempts);
        assert!(delay <= 30_000 + 7_500);
        assert!(delay >= 30_000 - 7_500);
    }
}

// ── claim → dispatch → delivered ──────────────────────────────────────

#[tokio::test]
async fn claimed_rows_are_dispatched_to_both_streams() -> anyhow::Result<()> {
    let state = test_state()?;
    crate::ingest::handle_ingest(&state, test_input("s1", "t1", "hello there"))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let claimed = state.store.claim_outbox(crate::events::epoch_ms(), "outbox-test", 16);
    assert!(!claimed.is_empty());
    for row in &claimed {
        crate::outbox::dispatch_row(&state, row)?;
        state.store.mark_delivered(row, crate::events::epoch_ms());
    }

    let session_key = state.config.session_stream_key("s1");
    assert_eq!(state.broker.len(&session_key), claimed.len());
    assert_eq!(state.broker.len(&state.config.stream_global_key), claimed.len());

    let counts = state.store.outbox_counts();
    assert_eq!(counts.delivered as usize, claimed.len());
    assert_eq!(counts.pending, 0);
    Ok(())
}

#[tokio::test]
async fn inline_dispatch_skips_the_worker() -> anyhow::Result<()> {
    let mut config = crate::test_support::test_config();
    config.outbox_inline_dispatch = true;
    let state = crate::test_support::test_state_with(config)?;

    crate::ingest::handle_ingest(&state, test_input("s1", "t1", "hello there"))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    // Everything was delivered within the write call.
    let counts = state.store.outbox_counts();
    assert_eq!(counts.pending, 0);
    assert!(counts.delivered > 0);
    assert!(state.broker.len(&state.config.stream_global_key) > 0);
    assert!(state.store.claim_outbox(crate::events::epoch_ms(), "w", 16).is_empty());
    Ok(())
}
