// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for communicating with a single external provider.

use reqwest::Client;

/// HTTP client wrapper for one provider instance.
pub struct ProviderClient {
    base_url: String,
    client: Client,
}

impl ProviderClient {
    pub fn new(base_url: String, timeout: std::time::Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        Self { base_url, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST the invoke envelope; returns the provider's response body.
    pub async fn invoke(&self, body: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
        self.post_json("/invoke", body).await
    }

    /// POST a user interaction follow-up.
    pub async fn interact(&self, body: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
        self.post_json("/interact", body).await
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let resp = self.client.post(self.url(path)).json(body).send().await?.error_for_status()?;
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}
