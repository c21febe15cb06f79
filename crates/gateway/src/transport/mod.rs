// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + SSE transport for the entrance gateway.

pub mod auth;
pub mod http;
pub mod sse;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::GatewayState;

/// Build the axum `Router` with all gateway routes.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        // Health + metrics (no auth)
        .route("/health", get(http::health))
        .route("/metrics", get(http::metrics_text))
        .route("/v0/metrics", get(http::metrics_json))
        // Ingest surface
        .route("/v0/ingest", post(http::ingest))
        .route("/v0/interact", post(http::interact))
        // Provider surface
        .route("/v0/events", post(http::push_events))
        .route("/v0/context/users/{profile_ref}", get(http::context))
        // Read surface
        .route("/v0/timeline", get(http::timeline))
        .route("/v0/stream", get(sse::stream))
        // Discovery
        .route("/.well-known/uniassist/manifest.json", get(http::manifest))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
