// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite persistence. One WAL-mode connection behind a mutex; the event
//! append and its outbox row share a transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};

use crate::context::UserContextSnapshot;
use crate::events::{EventKind, ProviderRun, RoutingMode, RunMode, TimelineEvent};
use crate::session::SessionState;

use super::{OutboxCounts, OutboxRow, OutboxStatus, StoreOrigin};

// Schema version (increment when changing table definitions)
const SCHEMA_VERSION: i32 = 1;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database: {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5_000)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock();
        let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if current_version != 0 && current_version != SCHEMA_VERSION {
            anyhow::bail!("unsupported database schema version {current_version}");
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                last_activity_at INTEGER NOT NULL,
                last_user_text TEXT,
                topic_drift_streak INTEGER NOT NULL DEFAULT 0,
                sticky_provider_id TEXT,
                sticky_score_boost REAL NOT NULL DEFAULT 0,
                switch_lead_provider_id TEXT,
                switch_lead_streak INTEGER NOT NULL DEFAULT 0,
                last_switch_ts INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS timeline_events (
                event_id TEXT PRIMARY KEY,
                trace_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                provider_id TEXT,
                run_id TEXT,
                seq INTEGER NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                kind TEXT NOT NULL,
                extension_kind TEXT,
                render_schema_ref TEXT,
                payload TEXT NOT NULL,
                UNIQUE(session_id, seq)
            );

            CREATE TABLE IF NOT EXISTS provider_runs (
                run_id TEXT PRIMARY KEY,
                trace_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                provider_id TEXT NOT NULL,
                mode TEXT NOT NULL,
                routing_mode TEXT NOT NULL,
                idempotency_key TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS outbox_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                last_error TEXT,
                next_retry_at INTEGER NOT NULL,
                locked_by TEXT,
                locked_at INTEGER,
                delivered_at INTEGER,
                consumed_at INTEGER,
                consumed_by TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_context_cache (
                profile_ref TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                snapshot TEXT NOT NULL,
                ttl_expires_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_activity ON sessions(last_activity_at);
            CREATE INDEX IF NOT EXISTS idx_events_session_seq ON timeline_events(session_id, seq);
            CREATE INDEX IF NOT EXISTS idx_runs_session ON provider_runs(session_id);
            CREATE INDEX IF NOT EXISTS idx_outbox_status_retry ON outbox_events(status, next_retry_at);
            CREATE INDEX IF NOT EXISTS idx_outbox_status_created ON outbox_events(status, created_at);
            CREATE INDEX IF NOT EXISTS idx_context_ttl ON user_context_cache(ttl_expires_at);
            "#,
        )?;

        conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])?;
        Ok(())
    }

    // -- Sessions -------------------------------------------------------------

    pub fn load_session(&self, session_id: &str) -> anyhow::Result<Option<SessionState>> {
        let conn = self.lock();
        let session = conn
            .query_row(
                r#"
                SELECT session_id, user_id, seq, last_activity_at, last_user_text,
                       topic_drift_streak, sticky_provider_id, sticky_score_boost,
                       switch_lead_provider_id, switch_lead_streak, last_switch_ts, created_at
                FROM sessions WHERE session_id = ?1
                "#,
                params![session_id],
                |row| {
                    Ok(SessionState {
                        session_id: row.get(0)?,
                        user_id: row.get(1)?,
                        seq: row.get::<_, i64>(2)? as u64,
                        last_activity_at: row.get::<_, i64>(3)? as u64,
                        last_user_text: row.get(4)?,
                        topic_drift_streak: row.get::<_, i64>(5)? as u32,
                        sticky_provider_id: row.get(6)?,
                        sticky_score_boost: row.get(7)?,
                        switch_lead_provider_id: row.get(8)?,
                        switch_lead_streak: row.get::<_, i64>(9)? as u32,
                        last_switch_ts: row.get::<_, Option<i64>>(10)?.map(|v| v as u64),
                        created_at: row.get::<_, i64>(11)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    pub fn save_session(&self, session: &SessionState) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO sessions (
                session_id, user_id, seq, last_activity_at, last_user_text,
                topic_drift_streak, sticky_provider_id, sticky_score_boost,
                switch_lead_provider_id, switch_lead_streak, last_switch_ts,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(session_id) DO UPDATE SET
                user_id = ?2,
                seq = ?3,
                last_activity_at = ?4,
                last_user_text = ?5,
                topic_drift_streak = ?6,
                sticky_provider_id = ?7,
                sticky_score_boost = ?8,
                switch_lead_provider_id = ?9,
                switch_lead_streak = ?10,
                last_switch_ts = ?11,
                updated_at = ?13
            "#,
            params![
                session.session_id,
                session.user_id,
                session.seq as i64,
                session.last_activity_at as i64,
                session.last_user_text,
                session.topic_drift_streak as i64,
                session.sticky_provider_id,
                session.sticky_score_boost,
                session.switch_lead_provider_id,
                session.switch_lead_streak as i64,
                session.last_switch_ts.map(|v| v as i64),
                session.created_at as i64,
                crate::events::epoch_ms() as i64,
            ],
        )?;
        Ok(())
    }

    // -- Timeline events + outbox ---------------------------------------------

    pub fn append_event(
        &self,
        event: &TimelineEvent,
        channel: &str,
        payload: &serde_json::Value,
        max_attempts: u32,
        now: u64,
    ) -> anyhow::Result<OutboxRow> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT OR IGNORE INTO timeline_events (
                event_id, trace_id, session_id, user_id, provider_id, run_id,
                seq, timestamp_ms, kind, extension_kind, render_schema_ref, payload
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                event.event_id,
                event.trace_id,
                event.session_id,
                event.user_id,
                event.provider_id,
                event.run_id,
                event.seq as i64,
                event.timestamp_ms as i64,
                event.kind.as_str(),
                event.extension_kind,
                event.render_schema_ref,
                serde_json::to_string(&event.payload)?,
            ],
        )?;

        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, status FROM outbox_events WHERE event_id = ?1",
                params![event.event_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let id = match existing {
            Some((id, status)) => {
                // Terminal rows stay terminal; anything else re-queues.
                if status != "delivered" && status != "consumed" {
                    tx.execute(
                        "UPDATE outbox_events
                         SET status = 'pending', next_retry_at = ?2, updated_at = ?2
                         WHERE id = ?1",
                        params![id, now as i64],
                    )?;
                }
                id
            }
            None => {
                tx.execute(
                    r#"
                    INSERT INTO outbox_events (
                        event_id, session_id, channel, payload, status, attempts,
                        max_attempts, next_retry_at, created_at, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?6, ?6)
                    "#,
                    params![
                        event.event_id,
                        event.session_id,
                        channel,
                        serde_json::to_string(payload)?,
                        max_attempts as i64,
                        now as i64,
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };

        let row = Self::outbox_by_id(&tx, id)?
            .context("outbox row missing immediately after insert")?;
        tx.commit()?;
        Ok(row)
    }

    pub fn list_events(
        &self,
        session_id: &str,
        after: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<TimelineEvent>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT event_id, trace_id, session_id, user_id, provider_id, run_id,
                   seq, timestamp_ms, kind, extension_kind, render_schema_ref, payload
            FROM timeline_events
            WHERE session_id = ?1 AND seq > ?2
            ORDER BY seq ASC
            LIMIT ?3
            "#,
        )?;
        let rows = stmt.query_map(
            params![session_id, after as i64, limit as i64],
            Self::row_to_event,
        )?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    pub fn current_seq(&self, session_id: &str) -> anyhow::Result<u64> {
        let conn = self.lock();
        let seq: Option<i64> = conn.query_row(
            "SELECT MAX(seq) FROM timeline_events WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(seq.unwrap_or(0) as u64)
    }

    fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<TimelineEvent> {
        let kind_raw: String = row.get(8)?;
        let payload_raw: String = row.get(11)?;
        Ok(TimelineEvent {
            event_id: row.get(0)?,
            trace_id: row.get(1)?,
            session_id: row.get(2)?,
            user_id: row.get(3)?,
            provider_id: row.get(4)?,
            run_id: row.get(5)?,
            seq: row.get::<_, i64>(6)? as u64,
            timestamp_ms: row.get::<_, i64>(7)? as u64,
            kind: EventKind::parse(&kind_raw).unwrap_or(EventKind::DomainEvent),
            extension_kind: row.get(9)?,
            render_schema_ref: row.get(10)?,
            payload: serde_json::from_str(&payload_raw).unwrap_or(serde_json::Value::Null),
        })
    }

    // -- Provider runs --------------------------------------------------------

    pub fn insert_run(&self, run: &ProviderRun) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO provider_runs (
                run_id, trace_id, session_id, user_id, provider_id, mode,
                routing_mode, idempotency_key, status, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            ON CONFLICT(idempotency_key) DO NOTHING
            "#,
            params![
                run.run_id,
                run.trace_id,
                run.session_id,
                run.user_id,
                run.provider_id,
                match run.mode {
                    RunMode::Sync => "sync",
                    RunMode::Async => "async",
                },
                match run.routing_mode {
                    RoutingMode::Normal => "normal",
                    RoutingMode::Fallback => "fallback",
                },
                run.idempotency_key,
                run.status,
                crate::events::epoch_ms() as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> anyhow::Result<Option<ProviderRun>> {
        let conn = self.lock();
        let run = conn
            .query_row(
                r#"
                SELECT run_id, trace_id, session_id, user_id, provider_id, mode,
                       routing_mode, idempotency_key, status
                FROM provider_runs WHERE run_id = ?1
                "#,
                params![run_id],
                |row| {
                    let mode_raw: String = row.get(5)?;
                    let routing_raw: String = row.get(6)?;
                    Ok(ProviderRun {
                        run_id: row.get(0)?,
                        trace_id: row.get(1)?,
                        session_id: row.get(2)?,
                        user_id: row.get(3)?,
                        provider_id: row.get(4)?,
                        mode: if mode_raw == "sync" { RunMode::Sync } else { RunMode::Async },
                        routing_mode: if routing_raw == "fallback" {
                            RoutingMode::Fallback
                        } else {
                            RoutingMode::Normal
                        },
                        idempotency_key: row.get(7)?,
                        status: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(run)
    }

    pub fn update_run_status(&self, run_id: &str, status: &str, now: u64) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE provider_runs SET status = ?2, updated_at = ?3 WHERE run_id = ?1",
            params![run_id, status, now as i64],
        )?;
        Ok(())
    }

    // -- Outbox ---------------------------------------------------------------

    pub fn claim_outbox(
        &self,
        now: u64,
        locked_by: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<OutboxRow>> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT id FROM outbox_events
                WHERE status IN ('pending', 'failed') AND next_retry_at <= ?1
                ORDER BY next_retry_at ASC
                LIMIT ?2
                "#,
            )?;
            let rows = stmt.query_map(params![now as i64, limit as i64], |row| row.get(0))?;
            let mut ids = Vec::new();
            for id in rows {
                ids.push(id?);
            }
            ids
        };

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            tx.execute(
                r#"
                UPDATE outbox_events
                SET status = 'processing', locked_by = ?2, locked_at = ?3,
                    attempts = attempts + 1, updated_at = ?3
                WHERE id = ?1
                "#,
                params![id, locked_by, now as i64],
            )?;
            if let Some(row) = Self::outbox_by_id(&tx, id)? {
                claimed.push(row);
            }
        }
        tx.commit()?;
        Ok(claimed)
    }

    pub fn mark_delivered(&self, id: i64, now: u64) -> anyhow::Result<()> {
        let conn = self.lock();
        // Never downgrade a row the consumer already acked.
        conn.execute(
            r#"
            UPDATE outbox_events
            SET status = CASE WHEN status IN ('pending', 'processing') THEN 'delivered' ELSE status END,
                delivered_at = COALESCE(delivered_at, ?2),
                locked_by = NULL, locked_at = NULL, updated_at = ?2
            WHERE id = ?1
            "#,
            params![id, now as i64],
        )?;
        Ok(())
    }

    pub fn mark_failed(
        &self,
        id: i64,
        error: &str,
        next_retry_at: u64,
        dead: bool,
        now: u64,
    ) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            UPDATE outbox_events
            SET status = ?2, last_error = ?3, next_retry_at = ?4, locked_by = NULL,
                locked_at = NULL, updated_at = ?5
            WHERE id = ?1
            "#,
            params![
                id,
                if dead { "dead_letter" } else { "failed" },
                error,
                next_retry_at as i64,
                now as i64,
            ],
        )?;
        Ok(())
    }

    pub fn mark_consumed(&self, event_id: &str, consumer: &str, now: u64) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            UPDATE outbox_events
            SET status = 'consumed', delivered_at = COALESCE(delivered_at, ?2),
                consumed_at = ?2, consumed_by = ?3, updated_at = ?2
            WHERE event_id = ?1 AND status NOT IN ('failed', 'dead_letter')
            "#,
            params![event_id, now as i64, consumer],
        )?;
        Ok(())
    }

    pub fn release_claims(&self, locked_by_prefix: &str) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            UPDATE outbox_events
            SET locked_by = NULL, locked_at = NULL
            WHERE status = 'processing' AND locked_by LIKE ?1 || '%'
            "#,
            params![locked_by_prefix],
        )?;
        Ok(())
    }

    pub fn reclaim_stale(&self, now: u64, visibility_ms: u64) -> anyhow::Result<usize> {
        let conn = self.lock();
        let reclaimed = conn.execute(
            r#"
            UPDATE outbox_events
            SET status = 'pending', locked_by = NULL, locked_at = NULL,
                next_retry_at = ?1, updated_at = ?1
            WHERE status = 'processing'
              AND (locked_at IS NULL OR locked_at < ?2)
            "#,
            params![now as i64, now.saturating_sub(visibility_ms) as i64],
        )?;
        Ok(reclaimed)
    }

    pub fn outbox_get(&self, event_id: &str) -> anyhow::Result<Option<OutboxRow>> {
        let conn = self.lock();
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM outbox_events WHERE event_id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => Self::outbox_by_id(&conn, id),
            None => Ok(None),
        }
    }

    pub fn outbox_insert(&self, row: &OutboxRow) -> anyhow::Result<OutboxRow> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO outbox_events (
                event_id, session_id, channel, payload, status, attempts,
                max_attempts, last_error, next_retry_at, locked_by, locked_at,
                delivered_at, consumed_at, consumed_by, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                row.event_id,
                row.session_id,
                row.channel,
                serde_json::to_string(&row.payload)?,
                row.status.as_str(),
                row.attempts as i64,
                row.max_attempts as i64,
                row.last_error,
                row.next_retry_at as i64,
                row.locked_by,
                row.locked_at.map(|v| v as i64),
                row.delivered_at.map(|v| v as i64),
                row.consumed_at.map(|v| v as i64),
                row.consumed_by,
                row.created_at as i64,
                row.updated_at as i64,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Self::outbox_by_id(&conn, id)?.context("outbox row missing immediately after insert")
    }

    pub fn outbox_counts(&self) -> anyhow::Result<OutboxCounts> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM outbox_events GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        let mut counts = OutboxCounts::default();
        for row in rows {
            let (status, n) = row?;
            match OutboxStatus::parse(&status) {
                Some(OutboxStatus::Pending) => counts.pending = n,
                Some(OutboxStatus::Processing) => counts.processing = n,
                Some(OutboxStatus::Failed) => counts.failed = n,
                Some(OutboxStatus::Delivered) => counts.delivered = n,
                Some(OutboxStatus::DeadLetter) => counts.dead_letter = n,
                Some(OutboxStatus::Consumed) => counts.consumed = n,
                None => {}
            }
        }
        Ok(counts)
    }

    fn outbox_by_id(conn: &Connection, id: i64) -> anyhow::Result<Option<OutboxRow>> {
        let row = conn
            .query_row(
                r#"
                SELECT id, event_id, session_id, channel, payload, status, attempts,
                       max_attempts, last_error, next_retry_at, locked_by, locked_at,
                       delivered_at, consumed_at, consumed_by, created_at, updated_at
                FROM outbox_events WHERE id = ?1
                "#,
                params![id],
                |row| {
                    let status_raw: String = row.get(5)?;
                    let payload_raw: String = row.get(4)?;
                    Ok(OutboxRow {
                        id: row.get(0)?,
                        event_id: row.get(1)?,
                        session_id: row.get(2)?,
                        channel: row.get(3)?,
                        payload: serde_json::from_str(&payload_raw)
                            .unwrap_or(serde_json::Value::Null),
                        status: OutboxStatus::parse(&status_raw)
                            .unwrap_or(OutboxStatus::Pending),
                        attempts: row.get::<_, i64>(6)? as u32,
                        max_attempts: row.get::<_, i64>(7)? as u32,
                        last_error: row.get(8)?,
                        next_retry_at: row.get::<_, i64>(9)? as u64,
                        locked_by: row.get(10)?,
                        locked_at: row.get::<_, Option<i64>>(11)?.map(|v| v as u64),
                        delivered_at: row.get::<_, Option<i64>>(12)?.map(|v| v as u64),
                        consumed_at: row.get::<_, Option<i64>>(13)?.map(|v| v as u64),
                        consumed_by: row.get(14)?,
                        created_at: row.get::<_, i64>(15)? as u64,
                        updated_at: row.get::<_, i64>(16)? as u64,
                        origin: StoreOrigin::Durable,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // -- User-context cache ---------------------------------------------------

    pub fn context_get(
        &self,
        profile_ref: &str,
        now: u64,
    ) -> anyhow::Result<Option<UserContextSnapshot>> {
        let conn = self.lock();
        let snapshot = conn
            .query_row(
                r#"
                SELECT profile_ref, user_id, snapshot, ttl_expires_at
                FROM user_context_cache
                WHERE profile_ref = ?1 AND ttl_expires_at > ?2
                "#,
                params![profile_ref, now as i64],
                |row| {
                    let raw: String = row.get(2)?;
                    Ok(UserContextSnapshot {
                        profile_ref: row.get(0)?,
                        user_id: row.get(1)?,
                        snapshot: serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null),
                        ttl_expires_at: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    pub fn context_put(&self, snapshot: &UserContextSnapshot) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO user_context_cache (profile_ref, user_id, snapshot, ttl_expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(profile_ref) DO UPDATE SET
                user_id = ?2, snapshot = ?3, ttl_expires_at = ?4, updated_at = ?5
            "#,
            params![
                snapshot.profile_ref,
                snapshot.user_id,
                serde_json::to_string(&snapshot.snapshot)?,
                snapshot.ttl_expires_at as i64,
                crate::events::epoch_ms() as i64,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
