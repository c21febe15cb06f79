// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HMAC gate for external-channel ingests.
//!
//! Non-app sources must sign `timestamp + "." + nonce + "." + rawBody` with
//! the shared adapter secret. The gate enforces a 5-minute clock-skew window
//! and a 5-minute nonce replay window; every failure maps to the same
//! `INVALID_SIGNATURE` so callers learn nothing about which check tripped.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use axum::http::HeaderMap;
use ring::hmac;

use crate::error::GatewayError;

pub const SIGNATURE_HEADER: &str = "signature";
pub const TIMESTAMP_HEADER: &str = "timestamp";
pub const NONCE_HEADER: &str = "nonce";

/// Accepted clock skew between the caller and the gateway.
pub const MAX_CLOCK_SKEW_MS: u64 = 5 * 60 * 1_000;
/// Window within which a nonce may not be reused.
pub const NONCE_TTL_MS: u64 = 5 * 60 * 1_000;

/// Equality check whose timing does not depend on where the inputs differ.
///
/// The HMAC tag itself is compared inside `ring`; this covers the gateway's
/// other secret comparisons (bearer and query tokens).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// In-memory anti-replay map: nonce → first-seen timestamp.
pub struct NonceCache {
    inner: Mutex<HashMap<String, u64>>,
}

impl NonceCache {
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the nonce; returns false when it was already seen within the
    /// replay window. Expired entries are pruned on the way in.
    pub fn check_and_insert(&self, nonce: &str, now: u64) -> bool {
        let mut seen = self.lock();
        seen.retain(|_, &mut at| now.saturating_sub(at) <= NONCE_TTL_MS);
        if seen.contains_key(nonce) {
            return false;
        }
        seen.insert(nonce.to_owned(), now);
        true
    }
}

impl Default for NonceCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Verify the HMAC envelope of an external-source request.
pub fn verify_external(
    secret: &str,
    headers: &HeaderMap,
    body: &[u8],
    nonces: &NonceCache,
    now: u64,
) -> Result<(), GatewayError> {
    let signature = header_str(headers, SIGNATURE_HEADER)?;
    let timestamp_raw = header_str(headers, TIMESTAMP_HEADER)?;
    let nonce = header_str(headers, NONCE_HEADER)?;

    let timestamp: u64 =
        timestamp_raw.parse().map_err(|_| GatewayError::InvalidSignature)?;
    if now.abs_diff(timestamp) > MAX_CLOCK_SKEW_MS {
        return Err(GatewayError::InvalidSignature);
    }

    let sig_bytes = hex::decode(signature).map_err(|_| GatewayError::InvalidSignature)?;

    let mut material = Vec::with_capacity(timestamp_raw.len() + nonce.len() + body.len() + 2);
    material.extend_from_slice(timestamp_raw.as_bytes());
    material.push(b'.');
    material.extend_from_slice(nonce.as_bytes());
    material.push(b'.');
    material.extend_from_slice(body);

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    hmac::verify(&key, &material, &sig_bytes).map_err(|_| GatewayError::InvalidSignature)?;

    // Replay check last: only verified requests burn a nonce.
    if !nonces.check_and_insert(nonce, now) {
        return Err(GatewayError::InvalidSignature);
    }
    Ok(())
}

/// Compute the hex signature for the envelope. Used by adapters and tests.
pub fn sign(secret: &str, timestamp: u64, nonce: &str, body: &[u8]) -> String {
    let mut material = Vec::new();
    material.extend_from_slice(timestamp.to_string().as_bytes());
    material.push(b'.');
    material.extend_from_slice(nonce.as_bytes());
    material.push(b'.');
    material.extend_from_slice(body);
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    hex::encode(hmac::sign(&key, &material).as_ref())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, GatewayError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(GatewayError::InvalidSignature)
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
