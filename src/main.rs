//! Intelli Policy - streaming question answering client for the subsidy
//! policy backend
//!
//! Submits questions to the backend's streaming endpoint, reveals the answer
//! as it arrives and falls back to a single-shot request when the stream
//! fails before producing anything.

mod accumulator;
mod client;
mod config;
mod console;
mod location;
mod runtime;
mod state_machine;
mod typewriter;
mod voice;

use client::{HttpFallbackRequester, HttpStreamChannel, LoggingRequester};
use config::ClientConfig;
use location::{FixedCoordinates, LocationCapability, LocationProvider};
use runtime::{HostOptions, SessionHost};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they never interleave with the answer on stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "intelli_policy=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();
    tracing::info!(
        base_url = %config.base_url,
        fallback_timeout_secs = config.fallback_timeout.as_secs(),
        "Configuration loaded"
    );

    let fallback = HttpFallbackRequester::new(&config)?;
    match fallback.health().await {
        Ok(health) if health.agent_ready && health.kb_ready => {
            tracing::info!(kb_doc_count = health.kb_doc_count, "Backend ready");
        }
        Ok(health) => {
            tracing::warn!(
                status = %health.status,
                agent_ready = health.agent_ready,
                kb_ready = health.kb_ready,
                "Backend reachable but not ready"
            );
        }
        Err(e) => tracing::warn!(error = %e, "Backend health check failed"),
    }

    let capability = config
        .coordinates
        .map(|c| Arc::new(FixedCoordinates(c)) as Arc<dyn LocationCapability>);
    let location = LocationProvider::new(
        capability,
        config.default_location.clone(),
        config.location_timeout,
    )
    .resolve()
    .await;

    let transport = HttpStreamChannel::new(&config)?;
    let handle = SessionHost::spawn(
        transport,
        LoggingRequester::new(fallback),
        HostOptions::from_config(&config, location),
    );

    let renderer = tokio::spawn(console::render(
        handle.subscribe(),
        handle.reveal(),
        handle.voice_input(),
    ));

    let result = console::run_repl(&handle).await;

    handle.shutdown().await;
    renderer.abort();
    result
}
