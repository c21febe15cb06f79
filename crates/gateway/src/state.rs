// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::broker::{StreamBroker, TimelineHub};
use crate::config::GatewayConfig;
use crate::ingest::signature::NonceCache;
use crate::metrics::Metrics;
use crate::providers::ProviderRegistry;
use crate::session::SessionManager;
use crate::store::GatewayStore;

/// Shared gateway state.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub store: GatewayStore,
    pub broker: StreamBroker,
    pub hub: TimelineHub,
    pub sessions: SessionManager,
    pub providers: ProviderRegistry,
    pub metrics: Arc<Metrics>,
    pub nonces: NonceCache,
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let metrics = Arc::new(Metrics::default());
        let store = match config.db_path {
            Some(ref path) => GatewayStore::with_sqlite(path, Arc::clone(&metrics))?,
            None => GatewayStore::in_memory(Arc::clone(&metrics)),
        };
        let sessions = SessionManager::new(config.idle_threshold_ms());
        let providers = ProviderRegistry::from_config(&config);
        Ok(Self {
            config,
            store,
            broker: StreamBroker::new(),
            hub: TimelineHub::new(),
            sessions,
            providers,
            metrics,
            nonces: NonceCache::new(),
            shutdown,
        })
    }
}
