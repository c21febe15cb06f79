// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider registry and dispatch.

pub mod builtin;
pub mod client;
pub mod invoker;

use std::collections::HashMap;

use crate::config::GatewayConfig;

/// Maps provider ids to their dispatch surface: an external base URL, or the
/// builtin behaviours when none is configured.
pub struct ProviderRegistry {
    urls: HashMap<String, String>,
    timeout: std::time::Duration,
}

impl ProviderRegistry {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self { urls: config.provider_url_map(), timeout: config.provider_timeout() }
    }

    pub fn base_url(&self, provider_id: &str) -> Option<&str> {
        self.urls.get(provider_id).map(String::as_str)
    }

    pub fn is_external(&self, provider_id: &str) -> bool {
        self.urls.contains_key(provider_id)
    }

    pub fn timeout(&self) -> std::time::Duration {
        self.timeout
    }
}
