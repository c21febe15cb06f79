// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for unit tests.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::events::{epoch_ms, UnifiedUserInput, SCHEMA_VERSION};
use crate::state::GatewayState;

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        db_path: None,
        auth_token: None,
        adapter_secret: None,
        provider_context_token: None,
        provider_urls: None,
        stream_prefix: "uniassist:timeline".to_owned(),
        stream_global_key: "uniassist:timeline:global".to_owned(),
        outbox_inline_dispatch: false,
        outbox_workers: 2,
        outbox_poll_ms: 25,
        outbox_max_attempts: 12,
        outbox_visibility_ms: 30_000,
        provider_timeout_ms: 1_000,
        session_idle_hours: 24,
    }
}

pub fn test_state() -> anyhow::Result<Arc<GatewayState>> {
    test_state_with(test_config())
}

pub fn test_state_with(config: GatewayConfig) -> anyhow::Result<Arc<GatewayState>> {
    Ok(Arc::new(GatewayState::new(config, CancellationToken::new())?))
}

pub fn test_input(session_id: &str, trace_id: &str, text: &str) -> UnifiedUserInput {
    UnifiedUserInput {
        schema_version: SCHEMA_VERSION.to_owned(),
        trace_id: trace_id.to_owned(),
        user_id: "u1".to_owned(),
        session_id: session_id.to_owned(),
        source: "app".to_owned(),
        timestamp_ms: epoch_ms(),
        text: Some(text.to_owned()),
        locale: None,
        timezone: None,
    }
}
