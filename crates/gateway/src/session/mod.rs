// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle: resolution, rotation, and serialized sequence
//! assignment. Every session has one in-process entry guarded by a mutex;
//! holding that lock across a turn is what keeps `seq` gapless under
//! concurrent ingests.

pub mod routing;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::store::GatewayStore;

/// Conversational state for one user on one logical conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    pub user_id: String,
    /// Last assigned event sequence number.
    pub seq: u64,
    pub last_activity_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_user_text: Option<String>,
    pub topic_drift_streak: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticky_provider_id: Option<String>,
    pub sticky_score_boost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_lead_provider_id: Option<String>,
    pub switch_lead_streak: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_switch_ts: Option<u64>,
    pub created_at: u64,
}

impl SessionState {
    pub fn new(session_id: String, user_id: String, now: u64) -> Self {
        Self {
            session_id,
            user_id,
            seq: 0,
            last_activity_at: now,
            last_user_text: None,
            topic_drift_streak: 0,
            sticky_provider_id: None,
            sticky_score_boost: 0.0,
            switch_lead_provider_id: None,
            switch_lead_streak: 0,
            last_switch_ts: None,
            created_at: now,
        }
    }

    /// Assign the next event sequence number. Callers hold the session lock.
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// Outcome of resolving a session for an ingest.
pub struct ResolvedSession {
    pub entry: Arc<Mutex<SessionState>>,
    pub rotated: bool,
    /// Set when `rotated`, naming the idle session left behind.
    pub previous_session_id: Option<String>,
}

/// In-process session registry backed by the store.
pub struct SessionManager {
    entries: RwLock<HashMap<String, Arc<Mutex<SessionState>>>>,
    idle_threshold_ms: u64,
}

impl SessionManager {
    pub fn new(idle_threshold_ms: u64) -> Self {
        Self { entries: RwLock::new(HashMap::new()), idle_threshold_ms }
    }

    /// Find an existing session without creating or rotating it.
    pub async fn find(&self, store: &GatewayStore, session_id: &str) -> Option<Arc<Mutex<SessionState>>> {
        if let Some(entry) = self.entries.read().await.get(session_id) {
            return Some(Arc::clone(entry));
        }
        let loaded = store.load_session(session_id)?;
        Some(self.insert(loaded).await)
    }

    /// Resolve the session for an ingest: memory, then store, then create.
    /// Sessions idle past the threshold are rotated to a fresh id; the old
    /// session's log is left untouched.
    pub async fn resolve(
        &self,
        store: &GatewayStore,
        session_id: &str,
        user_id: &str,
        now: u64,
    ) -> ResolvedSession {
        let existing = match self.find(store, session_id).await {
            Some(entry) => entry,
            None => {
                let entry = self
                    .insert(SessionState::new(session_id.to_owned(), user_id.to_owned(), now))
                    .await;
                return ResolvedSession { entry, rotated: false, previous_session_id: None };
            }
        };

        let idle = {
            let state = existing.lock().await;
            now.saturating_sub(state.last_activity_at) > self.idle_threshold_ms
        };
        if idle {
            let fresh = self.rotate(user_id, now).await;
            return ResolvedSession {
                entry: fresh,
                rotated: true,
                previous_session_id: Some(session_id.to_owned()),
            };
        }

        existing.lock().await.last_activity_at = now;
        ResolvedSession { entry: existing, rotated: false, previous_session_id: None }
    }

    /// Mint a fresh session (new id, `seq = 0`, sticky state cleared).
    pub async fn rotate(&self, user_id: &str, now: u64) -> Arc<Mutex<SessionState>> {
        let fresh = SessionState::new(uuid::Uuid::new_v4().to_string(), user_id.to_owned(), now);
        self.insert(fresh).await
    }

    async fn insert(&self, state: SessionState) -> Arc<Mutex<SessionState>> {
        let id = state.session_id.clone();
        let mut entries = self.entries.write().await;
        // A concurrent insert for the same id wins; both callers must end up
        // serializing on the same lock.
        match entries.entry(id) {
            std::collections::hash_map::Entry::Occupied(existing) => Arc::clone(existing.get()),
            std::collections::hash_map::Entry::Vacant(slot) => {
                let entry = Arc::new(Mutex::new(state));
                slot.insert(Arc::clone(&entry));
                entry
            }
        }
    }

    pub async fn session_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
