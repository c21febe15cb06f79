// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hot in-memory store. Always present; the only store in non-durable mode.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::context::UserContextSnapshot;
use crate::events::{ProviderRun, TimelineEvent};
use crate::session::SessionState;

use super::{OutboxCounts, OutboxRow, OutboxStatus, StoreOrigin};

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionState>,
    events: HashMap<String, Vec<TimelineEvent>>,
    event_ids: HashSet<String>,
    outbox: BTreeMap<i64, OutboxRow>,
    outbox_by_event: HashMap<String, i64>,
    runs: HashMap<String, ProviderRun>,
    runs_by_key: HashMap<String, String>,
    context: HashMap<String, UserContextSnapshot>,
    next_outbox_id: i64,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { next_outbox_id: 1, ..Inner::default() }) }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Sessions -------------------------------------------------------------

    pub fn load_session(&self, session_id: &str) -> Option<SessionState> {
        self.lock().sessions.get(session_id).cloned()
    }

    pub fn save_session(&self, session: &SessionState) {
        self.lock().sessions.insert(session.session_id.clone(), session.clone());
    }

    // -- Timeline events ------------------------------------------------------

    /// Insert the event into the timeline buffer without touching the outbox.
    /// Used to mirror events whose outbox row lives in the durable store.
    pub fn insert_event_only(&self, event: &TimelineEvent) {
        let mut inner = self.lock();
        Self::push_event(&mut inner, event);
    }

    pub fn append_event(
        &self,
        event: &TimelineEvent,
        channel: &str,
        payload: &serde_json::Value,
        max_attempts: u32,
        now: u64,
    ) -> anyhow::Result<OutboxRow> {
        let mut inner = self.lock();
        Self::push_event(&mut inner, event);

        // Exactly one outbox row per event id; terminal rows stay terminal.
        let existing = inner.outbox_by_event.get(&event.event_id).copied();
        if let Some(id) = existing {
            if let Some(row) = inner.outbox.get_mut(&id) {
                if !matches!(row.status, OutboxStatus::Delivered | OutboxStatus::Consumed) {
                    row.status = OutboxStatus::Pending;
                    row.next_retry_at = now;
                    row.updated_at = now;
                }
                return Ok(row.clone());
            }
        }

        let id = inner.next_outbox_id;
        inner.next_outbox_id += 1;
        let row = OutboxRow {
            id,
            event_id: event.event_id.clone(),
            session_id: event.session_id.clone(),
            channel: channel.to_owned(),
            payload: payload.clone(),
            status: OutboxStatus::Pending,
            attempts: 0,
            max_attempts,
            last_error: None,
            next_retry_at: now,
            locked_by: None,
            locked_at: None,
            delivered_at: None,
            consumed_at: None,
            consumed_by: None,
            created_at: now,
            updated_at: now,
            origin: StoreOrigin::Memory,
        };
        inner.outbox.insert(id, row.clone());
        inner.outbox_by_event.insert(event.event_id.clone(), id);
        Ok(row)
    }

    fn push_event(inner: &mut Inner, event: &TimelineEvent) {
        if !inner.event_ids.insert(event.event_id.clone()) {
            return;
        }
        let timeline = inner.events.entry(event.session_id.clone()).or_default();
        timeline.push(event.clone());
        // Writers emit in seq order; concurrent producers may interleave.
        if timeline.len() > 1 {
            let last = timeline.len() - 1;
            if timeline[last - 1].seq > timeline[last].seq {
                timeline.sort_by_key(|e| e.seq);
            }
        }
    }

    pub fn list_events(&self, session_id: &str, after: u64, limit: usize) -> Vec<TimelineEvent> {
        let inner = self.lock();
        let Some(timeline) = inner.events.get(session_id) else {
            return Vec::new();
        };
        timeline.iter().filter(|e| e.seq > after).take(limit).cloned().collect()
    }

    pub fn current_seq(&self, session_id: &str) -> u64 {
        let inner = self.lock();
        inner
            .events
            .get(session_id)
            .and_then(|t| t.last())
            .map(|e| e.seq)
            .unwrap_or(0)
    }

    // -- Provider runs --------------------------------------------------------

    pub fn insert_run(&self, run: &ProviderRun) -> ProviderRun {
        let mut inner = self.lock();
        if let Some(existing_id) = inner.runs_by_key.get(&run.idempotency_key) {
            if let Some(existing) = inner.runs.get(existing_id) {
                return existing.clone();
            }
        }
        inner.runs_by_key.insert(run.idempotency_key.clone(), run.run_id.clone());
        inner.runs.insert(run.run_id.clone(), run.clone());
        run.clone()
    }

    pub fn get_run(&self, run_id: &str) -> Option<ProviderRun> {
        self.lock().runs.get(run_id).cloned()
    }

    pub fn update_run_status(&self, run_id: &str, status: &str, _now: u64) {
        if let Some(run) = self.lock().runs.get_mut(run_id) {
            run.status = status.to_owned();
        }
    }

    // -- Outbox ---------------------------------------------------------------

    pub fn claim_outbox(&self, now: u64, locked_by: &str, limit: usize) -> Vec<OutboxRow> {
        let mut inner = self.lock();
        let mut eligible: Vec<i64> = inner
            .outbox
            .values()
            .filter(|row| {
                matches!(row.status, OutboxStatus::Pending | OutboxStatus::Failed)
                    && row.next_retry_at <= now
            })
            .map(|row| row.id)
            .collect();
        eligible.sort_by_key(|id| inner.outbox.get(id).map(|r| r.next_retry_at).unwrap_or(0));
        eligible.truncate(limit);

        let mut claimed = Vec::with_capacity(eligible.len());
        for id in eligible {
            if let Some(row) = inner.outbox.get_mut(&id) {
                row.status = OutboxStatus::Processing;
                row.locked_by = Some(locked_by.to_owned());
                row.locked_at = Some(now);
                row.attempts += 1;
                row.updated_at = now;
                claimed.push(row.clone());
            }
        }
        claimed
    }

    pub fn mark_delivered(&self, id: i64, now: u64) {
        if let Some(row) = self.lock().outbox.get_mut(&id) {
            // The consumer may have acked already; never downgrade.
            if matches!(row.status, OutboxStatus::Pending | OutboxStatus::Processing) {
                row.status = OutboxStatus::Delivered;
            }
            row.delivered_at = row.delivered_at.or(Some(now));
            row.locked_by = None;
            row.locked_at = None;
            row.updated_at = now;
        }
    }

    pub fn mark_failed(&self, id: i64, error: &str, next_retry_at: u64, dead: bool, now: u64) {
        if let Some(row) = self.lock().outbox.get_mut(&id) {
            row.status = if dead { OutboxStatus::DeadLetter } else { OutboxStatus::Failed };
            row.last_error = Some(error.to_owned());
            row.next_retry_at = next_retry_at;
            row.locked_by = None;
            row.locked_at = None;
            row.updated_at = now;
        }
    }

    pub fn mark_consumed(&self, event_id: &str, consumer: &str, now: u64) {
        let mut inner = self.lock();
        let Some(&id) = inner.outbox_by_event.get(event_id) else {
            return;
        };
        if let Some(row) = inner.outbox.get_mut(&id) {
            // A consumed entry was necessarily dispatched, even when the ack
            // races ahead of the dispatcher's own bookkeeping.
            if !matches!(row.status, OutboxStatus::Failed | OutboxStatus::DeadLetter) {
                row.status = OutboxStatus::Consumed;
                row.delivered_at = row.delivered_at.or(Some(now));
                row.consumed_at = Some(now);
                row.consumed_by = Some(consumer.to_owned());
                row.updated_at = now;
            }
        }
    }

    pub fn release_claims(&self, locked_by_prefix: &str) {
        for row in self.lock().outbox.values_mut() {
            if row.status == OutboxStatus::Processing
                && row.locked_by.as_deref().is_some_and(|w| w.starts_with(locked_by_prefix))
            {
                row.locked_by = None;
                row.locked_at = None;
            }
        }
    }

    pub fn reclaim_stale(&self, now: u64, visibility_ms: u64) -> usize {
        let mut reclaimed = 0;
        for row in self.lock().outbox.values_mut() {
            if row.status != OutboxStatus::Processing {
                continue;
            }
            let expired = match row.locked_at {
                Some(at) => now.saturating_sub(at) > visibility_ms,
                None => true,
            };
            if expired {
                row.status = OutboxStatus::Pending;
                row.locked_by = None;
                row.locked_at = None;
                row.next_retry_at = now;
                row.updated_at = now;
                reclaimed += 1;
            }
        }
        reclaimed
    }

    pub fn outbox_get(&self, event_id: &str) -> Option<OutboxRow> {
        let inner = self.lock();
        let id = inner.outbox_by_event.get(event_id)?;
        inner.outbox.get(id).cloned()
    }

    pub fn outbox_insert(&self, row: &OutboxRow) -> OutboxRow {
        let mut inner = self.lock();
        let id = inner.next_outbox_id;
        inner.next_outbox_id += 1;
        let mut row = row.clone();
        row.id = id;
        row.origin = StoreOrigin::Memory;
        inner.outbox_by_event.insert(row.event_id.clone(), id);
        inner.outbox.insert(id, row.clone());
        row
    }

    pub fn outbox_counts(&self) -> OutboxCounts {
        let inner = self.lock();
        let mut counts = OutboxCounts::default();
        for row in inner.outbox.values() {
            match row.status {
                OutboxStatus::Pending => counts.pending += 1,
                OutboxStatus::Processing => counts.processing += 1,
                OutboxStatus::Failed => counts.failed += 1,
                OutboxStatus::Delivered => counts.delivered += 1,
                OutboxStatus::DeadLetter => counts.dead_letter += 1,
                OutboxStatus::Consumed => counts.consumed += 1,
            }
        }
        counts
    }

    // -- User-context cache ---------------------------------------------------

    pub fn context_get(&self, profile_ref: &str, now: u64) -> Option<UserContextSnapshot> {
        let inner = self.lock();
        let snapshot = inner.context.get(profile_ref)?;
        if snapshot.ttl_expires_at <= now {
            return None;
        }
        Some(snapshot.clone())
    }

    pub fn context_put(&self, snapshot: &UserContextSnapshot) {
        self.lock().context.insert(snapshot.profile_ref.clone(), snapshot.clone());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
