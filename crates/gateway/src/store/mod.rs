// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable storage for sessions, timeline events, provider runs, the
//! transactional outbox, and the user-context cache.
//!
//! The gateway always keeps a hot in-memory store. When a SQLite path is
//! configured, writes go to both and timeline reads merge the two, deduping
//! by event id. A durable write failure degrades that write to memory-only
//! and bumps the persistence-error counter; it never fails the caller as long
//! as the memory write succeeded.

pub mod memory;
pub mod sqlite;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::UserContextSnapshot;
use crate::events::{ProviderRun, TimelineEvent};
use crate::metrics::Metrics;
use crate::session::SessionState;
use self::memory::MemoryStore;
use self::sqlite::SqliteStore;

/// Default page cap for timeline reads.
pub const DEFAULT_PAGE_LIMIT: usize = 1000;

/// Outbox row lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
    DeadLetter,
    Consumed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
            Self::Consumed => "consumed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            "dead_letter" => Some(Self::DeadLetter),
            "consumed" => Some(Self::Consumed),
            _ => None,
        }
    }

    /// Terminal for the producer side: the row never returns to `pending`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Consumed | Self::DeadLetter)
    }
}

/// Which physical store a row was read from. Status updates are routed back
/// to the same store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreOrigin {
    #[default]
    Memory,
    Durable,
}

/// One dispatchable outbox row, paired 1:1 with a timeline event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxRow {
    pub id: i64,
    pub event_id: String,
    pub session_id: String,
    pub channel: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub next_retry_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_by: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(skip, default)]
    pub origin: StoreOrigin,
}

/// Outbox totals for health and metrics surfaces.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxCounts {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
    pub delivered: u64,
    pub dead_letter: u64,
    pub consumed: u64,
}

impl OutboxCounts {
    fn merge(self, other: OutboxCounts) -> OutboxCounts {
        OutboxCounts {
            pending: self.pending + other.pending,
            processing: self.processing + other.processing,
            failed: self.failed + other.failed,
            delivered: self.delivered + other.delivered,
            dead_letter: self.dead_letter + other.dead_letter,
            consumed: self.consumed + other.consumed,
        }
    }
}

/// Hot memory store plus optional SQLite persistence.
pub struct GatewayStore {
    mem: MemoryStore,
    durable: Option<SqliteStore>,
    metrics: Arc<Metrics>,
}

impl GatewayStore {
    pub fn in_memory(metrics: Arc<Metrics>) -> Self {
        Self { mem: MemoryStore::new(), durable: None, metrics }
    }

    pub fn with_sqlite(path: &Path, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let durable = SqliteStore::open(path)?;
        Ok(Self { mem: MemoryStore::new(), durable: Some(durable), metrics })
    }

    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }

    fn durable_error(&self, op: &str, e: &anyhow::Error) {
        self.metrics.persistence_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        tracing::error!(op = %op, err = %e, "durable store write failed, continuing in memory");
    }

    // -- Sessions -------------------------------------------------------------

    pub fn load_session(&self, session_id: &str) -> Option<SessionState> {
        if let Some(session) = self.mem.load_session(session_id) {
            return Some(session);
        }
        let durable = self.durable.as_ref()?;
        match durable.load_session(session_id) {
            Ok(found) => found,
            Err(e) => {
                self.durable_error("load_session", &e);
                None
            }
        }
    }

    pub fn save_session(&self, session: &SessionState) {
        self.mem.save_session(session);
        if let Some(ref durable) = self.durable {
            if let Err(e) = durable.save_session(session) {
                self.durable_error("save_session", &e);
            }
        }
    }

    // -- Timeline events + outbox ---------------------------------------------

    /// Append a timeline event and create (or reset) its outbox row. When a
    /// durable store is configured the event and the outbox row are written
    /// in one transaction.
    pub fn append_event(
        &self,
        event: &TimelineEvent,
        channel: &str,
        payload: &serde_json::Value,
        max_attempts: u32,
        now: u64,
    ) -> anyhow::Result<OutboxRow> {
        if let Some(ref durable) = self.durable {
            match durable.append_event(event, channel, payload, max_attempts, now) {
                Ok(row) => {
                    self.mem.insert_event_only(event);
                    return Ok(row);
                }
                Err(e) => self.durable_error("append_event", &e),
            }
        }
        self.mem.append_event(event, channel, payload, max_attempts, now)
    }

    /// Events with `seq > after`, ascending, merged across stores and capped.
    pub fn list_events(&self, session_id: &str, after: u64, limit: usize) -> Vec<TimelineEvent> {
        let mut events = self.mem.list_events(session_id, after, limit);
        if let Some(ref durable) = self.durable {
            match durable.list_events(session_id, after, limit) {
                Ok(stored) => {
                    for event in stored {
                        if !events.iter().any(|e| e.event_id == event.event_id) {
                            events.push(event);
                        }
                    }
                    events.sort_by_key(|e| e.seq);
                    events.truncate(limit);
                }
                Err(e) => self.durable_error("list_events", &e),
            }
        }
        events
    }

    /// Last assigned sequence number visible for a session.
    pub fn current_seq(&self, session_id: &str) -> u64 {
        let mem_seq = self.mem.current_seq(session_id);
        let durable_seq = self
            .durable
            .as_ref()
            .and_then(|d| d.current_seq(session_id).ok())
            .unwrap_or(0);
        mem_seq.max(durable_seq)
    }

    // -- Provider runs --------------------------------------------------------

    /// Insert a run, treating an idempotency-key collision as the same run.
    pub fn insert_run(&self, run: &ProviderRun) -> ProviderRun {
        let canonical = self.mem.insert_run(run);
        if let Some(ref durable) = self.durable {
            if let Err(e) = durable.insert_run(&canonical) {
                self.durable_error("insert_run", &e);
            }
        }
        canonical
    }

    pub fn get_run(&self, run_id: &str) -> Option<ProviderRun> {
        if let Some(run) = self.mem.get_run(run_id) {
            return Some(run);
        }
        let durable = self.durable.as_ref()?;
        match durable.get_run(run_id) {
            Ok(found) => found,
            Err(e) => {
                self.durable_error("get_run", &e);
                None
            }
        }
    }

    pub fn update_run_status(&self, run_id: &str, status: &str, now: u64) {
        self.mem.update_run_status(run_id, status, now);
        if let Some(ref durable) = self.durable {
            if let Err(e) = durable.update_run_status(run_id, status, now) {
                self.durable_error("update_run_status", &e);
            }
        }
    }

    // -- Outbox ---------------------------------------------------------------

    /// Atomically claim up to `limit` dispatchable rows for `locked_by`.
    /// Claimed rows move to `processing` with `attempts` incremented.
    pub fn claim_outbox(&self, now: u64, locked_by: &str, limit: usize) -> Vec<OutboxRow> {
        let mut rows = Vec::new();
        if let Some(ref durable) = self.durable {
            match durable.claim_outbox(now, locked_by, limit) {
                Ok(claimed) => rows.extend(claimed),
                Err(e) => self.durable_error("claim_outbox", &e),
            }
        }
        if rows.len() < limit {
            rows.extend(self.mem.claim_outbox(now, locked_by, limit - rows.len()));
        }
        rows
    }

    pub fn mark_delivered(&self, row: &OutboxRow, now: u64) {
        match row.origin {
            StoreOrigin::Memory => self.mem.mark_delivered(row.id, now),
            StoreOrigin::Durable => {
                if let Some(ref durable) = self.durable {
                    if let Err(e) = durable.mark_delivered(row.id, now) {
                        self.durable_error("mark_delivered", &e);
                    }
                }
            }
        }
    }

    pub fn mark_failed(&self, row: &OutboxRow, error: &str, next_retry_at: u64, dead: bool, now: u64) {
        match row.origin {
            StoreOrigin::Memory => self.mem.mark_failed(row.id, error, next_retry_at, dead, now),
            StoreOrigin::Durable => {
                if let Some(ref durable) = self.durable {
                    if let Err(e) = durable.mark_failed(row.id, error, next_retry_at, dead, now) {
                        self.durable_error("mark_failed", &e);
                    }
                }
            }
        }
    }

    /// Downstream ack: the broker entry for this event was projected.
    pub fn mark_consumed(&self, event_id: &str, consumer: &str, now: u64) {
        self.mem.mark_consumed(event_id, consumer, now);
        if let Some(ref durable) = self.durable {
            if let Err(e) = durable.mark_consumed(event_id, consumer, now) {
                self.durable_error("mark_consumed", &e);
            }
        }
    }

    /// Drop locks held by workers with this prefix, leaving status untouched.
    /// The watchdog re-queues the lock-less rows.
    pub fn release_claims(&self, locked_by_prefix: &str) {
        self.mem.release_claims(locked_by_prefix);
        if let Some(ref durable) = self.durable {
            if let Err(e) = durable.release_claims(locked_by_prefix) {
                self.durable_error("release_claims", &e);
            }
        }
    }

    /// Re-queue `processing` rows whose lock is missing or older than the
    /// visibility timeout. Returns how many rows were reclaimed.
    pub fn reclaim_stale(&self, now: u64, visibility_ms: u64) -> usize {
        let mut reclaimed = self.mem.reclaim_stale(now, visibility_ms);
        if let Some(ref durable) = self.durable {
            match durable.reclaim_stale(now, visibility_ms) {
                Ok(n) => reclaimed += n,
                Err(e) => self.durable_error("reclaim_stale", &e),
            }
        }
        reclaimed
    }

    pub fn outbox_get(&self, event_id: &str) -> Option<OutboxRow> {
        if let Some(ref durable) = self.durable {
            match durable.outbox_get(event_id) {
                Ok(Some(row)) => return Some(row),
                Ok(None) => {}
                Err(e) => self.durable_error("outbox_get", &e),
            }
        }
        self.mem.outbox_get(event_id)
    }

    /// Insert a raw outbox row, bypassing the event append path.
    pub fn outbox_insert(&self, row: &OutboxRow) -> anyhow::Result<OutboxRow> {
        match row.origin {
            StoreOrigin::Memory => Ok(self.mem.outbox_insert(row)),
            StoreOrigin::Durable => match self.durable {
                Some(ref durable) => durable.outbox_insert(row),
                None => Ok(self.mem.outbox_insert(row)),
            },
        }
    }

    pub fn outbox_counts(&self) -> OutboxCounts {
        let mut counts = self.mem.outbox_counts();
        if let Some(ref durable) = self.durable {
            match durable.outbox_counts() {
                Ok(c) => counts = counts.merge(c),
                Err(e) => self.durable_error("outbox_counts", &e),
            }
        }
        counts
    }

    // -- User-context cache ---------------------------------------------------

    pub fn context_get(&self, profile_ref: &str, now: u64) -> Option<UserContextSnapshot> {
        if let Some(ref durable) = self.durable {
            match durable.context_get(profile_ref, now) {
                Ok(found @ Some(_)) => return found,
                Ok(None) => return None,
                Err(e) => self.durable_error("context_get", &e),
            }
        }
        self.mem.context_get(profile_ref, now)
    }

    pub fn context_put(&self, snapshot: &UserContextSnapshot) {
        self.mem.context_put(snapshot);
        if let Some(ref durable) = self.durable {
            if let Err(e) = durable.context_put(snapshot) {
                self.durable_error("context_put", &e);
            }
        }
    }
}
