// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-local counters exposed on `/v0/metrics` (JSON) and `/metrics`
//! (text lines).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

/// Gateway counters. Cheap enough to bump from any task.
#[derive(Debug, Default)]
pub struct Metrics {
    pub ingest_accepted: AtomicU64,
    pub ingest_rejected: AtomicU64,
    pub events_appended: AtomicU64,
    pub sessions_rotated: AtomicU64,
    pub provider_invocations: AtomicU64,
    pub provider_failures: AtomicU64,
    pub provider_fallbacks: AtomicU64,
    pub outbox_delivered: AtomicU64,
    pub outbox_retries: AtomicU64,
    pub outbox_dead_letters: AtomicU64,
    pub outbox_consumed: AtomicU64,
    pub persistence_errors: AtomicU64,
    pub stream_connections: AtomicI64,
}

/// Point-in-time snapshot, serialized for `/v0/metrics`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub ingest_accepted: u64,
    pub ingest_rejected: u64,
    pub events_appended: u64,
    pub sessions_rotated: u64,
    pub provider_invocations: u64,
    pub provider_failures: u64,
    pub provider_fallbacks: u64,
    pub outbox_delivered: u64,
    pub outbox_retries: u64,
    pub outbox_dead_letters: u64,
    pub outbox_consumed: u64,
    pub persistence_errors: u64,
    pub stream_connections: i64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ingest_accepted: self.ingest_accepted.load(Ordering::Relaxed),
            ingest_rejected: self.ingest_rejected.load(Ordering::Relaxed),
            events_appended: self.events_appended.load(Ordering::Relaxed),
            sessions_rotated: self.sessions_rotated.load(Ordering::Relaxed),
            provider_invocations: self.provider_invocations.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            provider_fallbacks: self.provider_fallbacks.load(Ordering::Relaxed),
            outbox_delivered: self.outbox_delivered.load(Ordering::Relaxed),
            outbox_retries: self.outbox_retries.load(Ordering::Relaxed),
            outbox_dead_letters: self.outbox_dead_letters.load(Ordering::Relaxed),
            outbox_consumed: self.outbox_consumed.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
            stream_connections: self.stream_connections.load(Ordering::Relaxed),
        }
    }

    /// Render counters as `name value` lines for scrapers.
    pub fn render_text(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();
        for (name, value) in [
            ("uniassist_ingest_accepted_total", s.ingest_accepted),
            ("uniassist_ingest_rejected_total", s.ingest_rejected),
            ("uniassist_events_appended_total", s.events_appended),
            ("uniassist_sessions_rotated_total", s.sessions_rotated),
            ("uniassist_provider_invocations_total", s.provider_invocations),
            ("uniassist_provider_failures_total", s.provider_failures),
            ("uniassist_provider_fallbacks_total", s.provider_fallbacks),
            ("uniassist_outbox_delivered_total", s.outbox_delivered),
            ("uniassist_outbox_retries_total", s.outbox_retries),
            ("uniassist_outbox_dead_letters_total", s.outbox_dead_letters),
            ("uniassist_outbox_consumed_total", s.outbox_consumed),
            ("uniassist_persistence_errors_total", s.persistence_errors),
        ] {
            out.push_str(name);
            out.push(' ');
            out.push_str(&value.to_string());
            out.push('\n');
        }
        out.push_str("uniassist_stream_connections ");
        out.push_str(&s.stream_connections.to_string());
        out.push('\n');
        out
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
