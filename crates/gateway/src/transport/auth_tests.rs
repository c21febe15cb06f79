// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::{HeaderMap, HeaderValue};

use super::*;

fn headers_with(name: &str, value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(value) {
        if let Ok(name) = axum::http::HeaderName::try_from(name.to_owned()) {
            headers.insert(name, value);
        }
    }
    headers
}

// ── bearer ────────────────────────────────────────────────────────────

#[test]
fn bearer_disabled_when_no_token_configured() {
    assert!(validate_bearer(&HeaderMap::new(), None).is_ok());
}

#[test]
fn bearer_accepts_matching_token() {
    let headers = headers_with("authorization", "Bearer tok123");
    assert!(validate_bearer(&headers, Some("tok123")).is_ok());
}

#[test]
fn bearer_rejects_missing_or_wrong_token() {
    assert!(validate_bearer(&HeaderMap::new(), Some("tok123")).is_err());
    let headers = headers_with("authorization", "Bearer nope");
    assert!(validate_bearer(&headers, Some("tok123")).is_err());
    let headers = headers_with("authorization", "tok123");
    assert!(validate_bearer(&headers, Some("tok123")).is_err());
}

#[test]
fn provider_token_maps_to_provider_error() {
    let headers = headers_with("authorization", "Bearer nope");
    assert_eq!(
        validate_provider_token(&headers, Some("tok")),
        Err(crate::error::GatewayError::InvalidProviderToken)
    );
}

// ── scopes ────────────────────────────────────────────────────────────

#[test]
fn scope_accepts_exact_and_wildcard() {
    let headers = headers_with(SCOPES_HEADER, "context:read");
    assert!(validate_scope(&headers, "context:read").is_ok());

    let headers = headers_with(SCOPES_HEADER, "events:write, context:read");
    assert!(validate_scope(&headers, "context:read").is_ok());

    let headers = headers_with(SCOPES_HEADER, "*");
    assert!(validate_scope(&headers, "context:read").is_ok());
}

#[test]
fn scope_rejects_missing_or_other() {
    assert_eq!(
        validate_scope(&HeaderMap::new(), "context:read"),
        Err(crate::error::GatewayError::MissingScope)
    );
    let headers = headers_with(SCOPES_HEADER, "events:write");
    assert_eq!(
        validate_scope(&headers, "context:read"),
        Err(crate::error::GatewayError::MissingScope)
    );
}

// ── query token ───────────────────────────────────────────────────────

#[test]
fn query_token_accepts_match_anywhere_in_query() {
    assert!(validate_query_token("cursor=3&token=tok", Some("tok")).is_ok());
    assert!(validate_query_token("token=wrong", Some("tok")).is_err());
    assert!(validate_query_token("", Some("tok")).is_err());
    assert!(validate_query_token("", None).is_ok());
}
