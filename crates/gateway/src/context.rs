// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-context snapshots served to providers, cached with a TTL.

use serde::{Deserialize, Serialize};

use crate::store::GatewayStore;

/// Cache lifetime for a synthesised snapshot.
pub const CONTEXT_TTL_MS: u64 = 24 * 3_600_000;

/// TTL-bounded snapshot of a user profile reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContextSnapshot {
    pub profile_ref: String,
    pub user_id: String,
    pub snapshot: serde_json::Value,
    pub ttl_expires_at: u64,
}

/// Read-through lookup: cache hit, or a freshly synthesised default snapshot
/// persisted with a 24h TTL.
pub fn get_or_synthesize(store: &GatewayStore, profile_ref: &str, now: u64) -> UserContextSnapshot {
    if let Some(snapshot) = store.context_get(profile_ref, now) {
        return snapshot;
    }
    let snapshot = UserContextSnapshot {
        profile_ref: profile_ref.to_owned(),
        user_id: profile_ref.to_owned(),
        snapshot: serde_json::json!({
            "profileRef": profile_ref,
            "displayName": format!("user {profile_ref}"),
            "locale": "en-US",
            "timezone": "UTC",
            "preferences": {},
        }),
        ttl_expires_at: now + CONTEXT_TTL_MS,
    };
    store.context_put(&snapshot);
    snapshot
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
