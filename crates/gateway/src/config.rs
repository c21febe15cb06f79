// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

/// Configuration for the entrance gateway.
#[derive(Debug, Clone, clap::Parser)]
pub struct GatewayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "UNIASSIST_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9460, env = "PORT")]
    pub port: u16,

    /// Path to the SQLite database. If unset, the gateway runs in-memory only.
    #[arg(long, env = "UNIASSIST_DB_PATH")]
    pub db_path: Option<std::path::PathBuf>,

    /// Bearer token for the app-facing API. If unset, auth is disabled.
    #[arg(long, env = "UNIASSIST_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Shared secret for external-channel HMAC signatures. If unset, all
    /// non-app sources are rejected.
    #[arg(long, env = "UNIASSIST_ADAPTER_SECRET")]
    pub adapter_secret: Option<String>,

    /// Bearer token providers present on `/v0/context` and `/v0/events`.
    #[arg(long, env = "UNIASSIST_PROVIDER_CONTEXT_TOKEN")]
    pub provider_context_token: Option<String>,

    /// Provider base URLs as a comma-separated `id=url` list. Providers
    /// without a URL are served by the builtin behaviours.
    #[arg(long, env = "UNIASSIST_PROVIDER_URLS")]
    pub provider_urls: Option<String>,

    /// Per-session stream key prefix.
    #[arg(long, default_value = "uniassist:timeline", env = "UNIASSIST_STREAM_PREFIX")]
    pub stream_prefix: String,

    /// Global stream key carrying every delivered event.
    #[arg(long, default_value = "uniassist:timeline:global", env = "UNIASSIST_STREAM_GLOBAL_KEY")]
    pub stream_global_key: String,

    /// Dispatch outbox rows to the broker inside the write call instead of
    /// leaving them for the worker.
    #[arg(long, default_value_t = false, env = "UNIASSIST_OUTBOX_INLINE_DISPATCH")]
    pub outbox_inline_dispatch: bool,

    /// Number of parallel outbox claim-dispatch workers.
    #[arg(long, default_value_t = 4, env = "UNIASSIST_OUTBOX_WORKERS")]
    pub outbox_workers: usize,

    /// Outbox poll interval in milliseconds.
    #[arg(long, default_value_t = 250, env = "UNIASSIST_OUTBOX_POLL_MS")]
    pub outbox_poll_ms: u64,

    /// Max dispatch attempts before a row is dead-lettered.
    #[arg(long, default_value_t = 12, env = "UNIASSIST_OUTBOX_MAX_ATTEMPTS")]
    pub outbox_max_attempts: u32,

    /// Visibility timeout for claimed outbox rows, in milliseconds. Rows
    /// locked longer than this are reclaimed by the watchdog.
    #[arg(long, default_value_t = 30_000, env = "UNIASSIST_OUTBOX_VISIBILITY_MS")]
    pub outbox_visibility_ms: u64,

    /// Per-call provider dispatch timeout in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "UNIASSIST_PROVIDER_TIMEOUT_MS")]
    pub provider_timeout_ms: u64,

    /// Idle hours after which the next ingest rotates the session.
    #[arg(long, default_value_t = 24, env = "UNIASSIST_SESSION_IDLE_HOURS")]
    pub session_idle_hours: u64,
}

impl GatewayConfig {
    pub fn outbox_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.outbox_poll_ms)
    }

    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn idle_threshold_ms(&self) -> u64 {
        self.session_idle_hours * 3_600_000
    }

    /// Per-session stream key for a session id.
    pub fn session_stream_key(&self, session_id: &str) -> String {
        format!("{}:session:{session_id}", self.stream_prefix)
    }

    /// Parse `UNIASSIST_PROVIDER_URLS` into an id → base-url map. Malformed
    /// entries are skipped.
    pub fn provider_url_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        let Some(ref raw) = self.provider_urls else {
            return map;
        };
        for entry in raw.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match entry.split_once('=') {
                Some((id, url)) if !id.is_empty() && !url.is_empty() => {
                    map.insert(id.trim().to_owned(), url.trim().trim_end_matches('/').to_owned());
                }
                _ => {
                    tracing::warn!(entry = %entry, "ignoring malformed provider url entry");
                }
            }
        }
        map
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
