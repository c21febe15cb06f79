// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;
use crate::metrics::Metrics;
use crate::store::GatewayStore;

fn test_store() -> GatewayStore {
    GatewayStore::in_memory(Arc::new(Metrics::default()))
}

const HOUR_MS: u64 = 3_600_000;

#[tokio::test]
async fn unknown_session_is_created_with_given_id() {
    let store = test_store();
    let manager = SessionManager::new(24 * HOUR_MS);
    let resolved = manager.resolve(&store, "s1", "u1", 1_000).await;
    assert!(!resolved.rotated);
    let session = resolved.entry.lock().await;
    assert_eq!(session.session_id, "s1");
    assert_eq!(session.seq, 0);
}

#[tokio::test]
async fn resolve_updates_last_activity() {
    let store = test_store();
    let manager = SessionManager::new(24 * HOUR_MS);
    manager.resolve(&store, "s1", "u1", 1_000).await;
    let resolved = manager.resolve(&store, "s1", "u1", 5_000).await;
    assert!(!resolved.rotated);
    assert_eq!(resolved.entry.lock().await.last_activity_at, 5_000);
}

#[tokio::test]
async fn idle_session_rotates_to_fresh_id() {
    let store = test_store();
    let manager = SessionManager::new(24 * HOUR_MS);
    let first = manager.resolve(&store, "s2", "u1", 1_000).await;
    {
        let mut session = first.entry.lock().await;
        session.seq = 9;
        session.sticky_provider_id = Some("plan".to_owned());
    }

    let later = 1_000 + 25 * HOUR_MS;
    let resolved = manager.resolve(&store, "s2", "u1", later).await;
    assert!(resolved.rotated);
    assert_eq!(resolved.previous_session_id.as_deref(), Some("s2"));

    let fresh = resolved.entry.lock().await;
    assert_ne!(fresh.session_id, "s2");
    assert_eq!(fresh.seq, 0);
    assert!(fresh.sticky_provider_id.is_none());

    // The idle session is untouched.
    drop(fresh);
    let old = manager.find(&store, "s2").await;
    assert!(old.is_some());
    if let Some(entry) = old {
        assert_eq!(entry.lock().await.seq, 9);
    }
}

#[tokio::test]
async fn session_is_loaded_from_store_on_memory_miss() {
    let store = test_store();
    let mut persisted = SessionState::new("s3".to_owned(), "u1".to_owned(), 2_000);
    persisted.seq = 4;
    store.save_session(&persisted);

    let manager = SessionManager::new(24 * HOUR_MS);
    let found = manager.find(&store, "s3").await;
    assert!(found.is_some());
    if let Some(entry) = found {
        assert_eq!(entry.lock().await.seq, 4);
    }
}

#[tokio::test]
async fn next_seq_is_strictly_increasing() {
    let mut session = SessionState::new("s4".to_owned(), "u1".to_owned(), 0);
    let seqs: Vec<u64> = (0..5).map(|_| session.next_seq()).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn concurrent_resolves_share_one_entry() {
    let store = Arc::new(test_store());
    let manager = Arc::new(SessionManager::new(24 * HOUR_MS));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            let resolved = manager.resolve(&store, "s5", "u1", 1_000).await;
            let mut session = resolved.entry.lock().await;
            session.next_seq()
        }));
    }

    let mut seqs = Vec::new();
    for handle in handles {
        if let Ok(seq) = handle.await {
            seqs.push(seq);
        }
    }
    seqs.sort_unstable();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(manager.session_count().await, 1);
}
