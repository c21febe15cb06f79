// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process append-only stream broker and the projector that feeds live
//! subscribers.
//!
//! Two key-spaces: one stream per session plus a global stream that carries
//! every delivered event with a backlink to its session stream. Consumer
//! groups hand out unseen entries, track them as pending, and re-deliver
//! entries whose claim went stale, so a crashed consumer never loses an
//! entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, Notify, RwLock};

use crate::events::{OutboxEnvelope, TimelineEvent};
use crate::state::GatewayState;

/// How long a group claim may sit unacked before re-delivery.
const GROUP_CLAIM_TIMEOUT_MS: u64 = 30_000;
/// Consumer group draining the global stream into the hub.
const PROJECTOR_GROUP: &str = "timeline-projector";

/// One broker entry. Ids are monotonic across all streams.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: u64,
    pub payload: serde_json::Value,
}

#[derive(Default)]
struct GroupState {
    cursor: u64,
    /// Claimed-but-unacked entry id → claim timestamp.
    pending: HashMap<u64, u64>,
}

#[derive(Default)]
struct BrokerInner {
    streams: HashMap<String, Vec<StreamEntry>>,
    groups: HashMap<(String, String), GroupState>,
    next_id: u64,
}

/// Append-only stream broker.
pub struct StreamBroker {
    inner: Mutex<BrokerInner>,
    notify: Notify,
}

impl StreamBroker {
    pub fn new() -> Self {
        Self { inner: Mutex::new(BrokerInner { next_id: 1, ..BrokerInner::default() }), notify: Notify::new() }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry and wake blocked group readers.
    pub fn append(&self, key: &str, payload: serde_json::Value) -> u64 {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.streams.entry(key.to_owned()).or_default().push(StreamEntry { id, payload });
            id
        };
        self.notify.notify_waiters();
        id
    }

    /// All entries with `id > after`, in append order.
    pub fn range(&self, key: &str, after: u64) -> Vec<StreamEntry> {
        let inner = self.lock();
        inner
            .streams
            .get(key)
            .map(|entries| entries.iter().filter(|e| e.id > after).cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, key: &str) -> usize {
        self.lock().streams.get(key).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }

    /// Read up to `count` entries for a consumer group: stale pending
    /// entries first, then unseen ones. Returned entries stay pending until
    /// acked.
    pub fn read_group(&self, key: &str, group: &str, count: usize, now: u64) -> Vec<StreamEntry> {
        let mut inner = self.lock();
        let BrokerInner { streams, groups, .. } = &mut *inner;
        let Some(entries) = streams.get(key) else {
            return Vec::new();
        };
        let state = groups.entry((key.to_owned(), group.to_owned())).or_default();

        let mut out: Vec<StreamEntry> = Vec::new();

        let mut stale: Vec<u64> = state
            .pending
            .iter()
            .filter(|(_, &claimed_at)| now.saturating_sub(claimed_at) > GROUP_CLAIM_TIMEOUT_MS)
            .map(|(&id, _)| id)
            .collect();
        stale.sort_unstable();
        for id in stale {
            if out.len() >= count {
                break;
            }
            if let Ok(idx) = entries.binary_search_by_key(&id, |e| e.id) {
                state.pending.insert(id, now);
                out.push(entries[idx].clone());
            } else {
                state.pending.remove(&id);
            }
        }

        let unseen_after = state.cursor;
        for entry in entries.iter().filter(|e| e.id > unseen_after) {
            if out.len() >= count {
                break;
            }
            state.cursor = entry.id;
            state.pending.insert(entry.id, now);
            out.push(entry.clone());
        }
        out
    }

    /// Acknowledge a group entry; it will not be re-delivered.
    pub fn ack(&self, key: &str, group: &str, id: u64) {
        let mut inner = self.lock();
        if let Some(state) = inner.groups.get_mut(&(key.to_owned(), group.to_owned())) {
            state.pending.remove(&id);
        }
    }

    pub fn pending_count(&self, key: &str, group: &str) -> usize {
        self.lock()
            .groups
            .get(&(key.to_owned(), group.to_owned()))
            .map(|s| s.pending.len())
            .unwrap_or(0)
    }

    /// Wait until something is appended somewhere.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

impl Default for StreamBroker {
    fn default() -> Self {
        Self::new()
    }
}

// -- Live subscription hub ----------------------------------------------------

/// Fans projected events out to `/v0/stream` subscribers, one broadcast
/// channel per session.
pub struct TimelineHub {
    senders: RwLock<HashMap<String, broadcast::Sender<TimelineEvent>>>,
}

impl TimelineHub {
    pub fn new() -> Self {
        Self { senders: RwLock::new(HashMap::new()) }
    }

    pub async fn subscribe(&self, session_id: &str) -> broadcast::Receiver<TimelineEvent> {
        let mut senders = self.senders.write().await;
        match senders.entry(session_id.to_owned()) {
            std::collections::hash_map::Entry::Occupied(occupied) => occupied.get().subscribe(),
            std::collections::hash_map::Entry::Vacant(slot) => {
                let (tx, rx) = broadcast::channel(256);
                slot.insert(tx);
                rx
            }
        }
    }

    pub async fn publish(&self, event: &TimelineEvent) {
        let mut senders = self.senders.write().await;
        let gone = match senders.get(&event.session_id) {
            Some(tx) => tx.send(event.clone()).is_err(),
            None => false,
        };
        if gone {
            // Last subscriber left; drop the channel.
            senders.remove(&event.session_id);
        }
    }
}

impl Default for TimelineHub {
    fn default() -> Self {
        Self::new()
    }
}

// -- Projector ----------------------------------------------------------------

/// Spawn the consumer that projects delivered events onto live subscribers
/// and acks them back into `consumed`. The handle completes once the
/// shutdown token fires.
pub fn spawn_projector(state: Arc<GatewayState>) -> tokio::task::JoinHandle<()> {
    let consumer = format!("projector-{}", uuid::Uuid::new_v4());
    tokio::spawn(async move {
        let global_key = state.config.stream_global_key.clone();
        loop {
            let now = crate::events::epoch_ms();
            let entries = state.broker.read_group(&global_key, PROJECTOR_GROUP, 64, now);
            if entries.is_empty() {
                tokio::select! {
                    _ = state.shutdown.cancelled() => break,
                    _ = state.broker.notified() => {}
                    _ = tokio::time::sleep(std::time::Duration::from_millis(250)) => {}
                }
                continue;
            }
            for entry in entries {
                match serde_json::from_value::<OutboxEnvelope>(entry.payload.clone()) {
                    Ok(envelope) => {
                        state.hub.publish(&envelope.event).await;
                        state.store.mark_consumed(&envelope.event.event_id, &consumer, now);
                        state
                            .metrics
                            .outbox_consumed
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::warn!(entry_id = entry.id, err = %e, "unparseable stream entry");
                    }
                }
                state.broker.ack(&global_key, PROJECTOR_GROUP, entry.id);
            }
        }
        tracing::debug!("projector stopped");
    })
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
