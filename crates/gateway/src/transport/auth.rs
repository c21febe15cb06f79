// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;
use crate::ingest::signature::{constant_time_eq, SIGNATURE_HEADER};
use crate::state::GatewayState;

/// Header carrying the caller's granted scopes, comma-separated.
pub const SCOPES_HEADER: &str = "x-uniassist-scopes";

/// Check the `Authorization: Bearer` header against the configured app
/// token. A gateway with no token configured runs open.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), GatewayError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => Err(GatewayError::Unauthorized),
    }
}

/// Validate the provider bearer token on provider-facing routes.
pub fn validate_provider_token(
    headers: &HeaderMap,
    expected: Option<&str>,
) -> Result<(), GatewayError> {
    validate_bearer(headers, expected).map_err(|_| GatewayError::InvalidProviderToken)
}

/// Require `scope` (or the wildcard) in the scopes header.
pub fn validate_scope(headers: &HeaderMap, scope: &str) -> Result<(), GatewayError> {
    let granted = headers
        .get(SCOPES_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(GatewayError::MissingScope)?;
    if granted.split(',').map(str::trim).any(|s| s == scope || s == "*") {
        Ok(())
    } else {
        Err(GatewayError::MissingScope)
    }
}

/// Check a `token=` pair in a raw query string. Stream subscribers (browser
/// `EventSource`) cannot set headers, so their token rides the URL.
pub fn validate_query_token(query: &str, expected: Option<&str>) -> Result<(), GatewayError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let presented = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "token")
        .map(|(_, value)| value);
    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => Err(GatewayError::Unauthorized),
    }
}

/// Axum middleware that enforces app bearer authentication.
///
/// Exempt: health, metrics, the manifest, provider-token-guarded routes
/// (`/v0/context`, `/v0/events`), HMAC-signed ingests, and the stream
/// endpoint (token checked from the query in the handler).
pub async fn auth_layer(
    state: State<Arc<GatewayState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();

    if path == "/health"
        || path == "/metrics"
        || path == "/v0/metrics"
        || path == "/.well-known/uniassist/manifest.json"
        || path.starts_with("/v0/context/")
        || path == "/v0/events"
        || path == "/v0/stream"
        || (path == "/v0/ingest" && req.headers().contains_key(SIGNATURE_HEADER))
    {
        return next.run(req).await;
    }

    if let Err(code) = validate_bearer(req.headers(), state.config.auth_token.as_deref()) {
        let body = crate::error::ErrorResponse { error: code.to_error_body("unauthorized") };
        return (
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::UNAUTHORIZED),
            axum::Json(body),
        )
            .into_response();
    }

    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
