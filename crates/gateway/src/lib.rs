// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UniAssist entrance gateway: event-sourced routing and delivery pipeline
//! for conversational inputs across provider services.

pub mod broker;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod ingest;
pub mod metrics;
pub mod outbox;
pub mod providers;
pub mod session;
pub mod state;
pub mod store;
pub mod transport;

#[cfg(test)]
pub mod test_support;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::state::GatewayState;
use crate::transport::build_router;

/// Run the gateway until shutdown.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let state = Arc::new(GatewayState::new(config, shutdown.clone())?);

    let mut background = outbox::worker::spawn_outbox_workers(Arc::clone(&state));
    background.push(broker::spawn_projector(Arc::clone(&state)));

    // First Ctrl-C starts the graceful drain; a second one kills the process.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                shutdown.cancel();
            }
        });
    }

    tracing::info!(
        durable = state.store.is_durable(),
        inline_dispatch = state.config.outbox_inline_dispatch,
        "uniassist gateway listening on {addr}"
    );
    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    // The workers and the projector exit on the same token; wait for them so
    // no dispatch is still advancing rows, then release whatever claims were
    // left mid-flight. The next start's watchdog re-queues them.
    for handle in background {
        if let Err(e) = handle.await {
            tracing::warn!(err = %e, "background task failed during shutdown");
        }
    }
    state.store.release_claims("outbox-");
    tracing::info!("uniassist gateway stopped");
    Ok(())
}
