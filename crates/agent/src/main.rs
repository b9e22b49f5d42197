//! Cluster Agent - mirrors Kubernetes cluster state and ships snapshots
//!
//! Starts every registered collector, waits for the initial sync, then
//! periodically ships an ownership-enriched snapshot of the store while the
//! lifecycle allows it.

use agent_lib::{
    collector::CollectorRegistry,
    health::{components, HealthRegistry},
    lifecycle::StateMachine,
    observability::{AgentMetrics, StructuredLogger},
    snapshot::{LogSink, SnapshotConfig, SnapshotLoop},
    store::Store,
    RegistryError,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cluster-agent");

    let config = config::AgentConfig::load().context("failed to load configuration")?;
    info!(
        node_name = %config.node_name,
        snapshot_interval_secs = config.snapshot_interval_secs,
        sync_timeout_secs = config.sync_timeout_secs,
        "Agent configured"
    );

    let shutdown = CancellationToken::new();
    let store = Arc::new(Store::new());

    let lifecycle = Arc::new(StateMachine::new());
    let exit_token = shutdown.clone();
    lifecycle.set_cancel_fn(move || exit_token.cancel());

    let health_registry = HealthRegistry::new();
    health_registry.register(components::COLLECTORS).await;
    health_registry.register(components::STORE).await;
    health_registry.register(components::BACKEND).await;

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    // Resource watchers register here; the orchestration below is agnostic
    // to how many there are.
    let registry = CollectorRegistry::new();
    if registry.is_empty() {
        warn!("No collectors registered, snapshots will be empty");
    }
    metrics.set_collectors_registered(registry.len());
    logger.log_startup(AGENT_VERSION, registry.len());

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        store.clone(),
        lifecycle.clone(),
        config.staleness_threshold(),
    ));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, shutdown.clone()));

    match registry.start_all(&shutdown).await {
        Ok(()) => logger.log_collectors_started(registry.len(), &[]),
        Err(e) if e.is_partial() => {
            let failed = e.failed_collectors();
            metrics.add_collector_start_failures(failed.len());
            logger.log_collectors_started(registry.len(), failed);
            health_registry
                .set_degraded(components::COLLECTORS, e.to_string())
                .await;
        }
        Err(e) => {
            metrics.add_collector_start_failures(registry.len());
            error!(error = %e, "Collectors failed to start");
            health_registry
                .set_unhealthy(components::COLLECTORS, e.to_string())
                .await;
            registry.stop_all().await;
            shutdown.cancel();
            return Err(e).context("no collector could be started");
        }
    }

    match registry
        .wait_for_sync_timeout(&shutdown, config.sync_timeout())
        .await
    {
        Ok(()) => health_registry.set_ready(true).await,
        Err(RegistryError::Cancelled) => {
            info!("Shutdown requested before collectors synced");
        }
        Err(e) => {
            error!(error = %e, "Initial collector sync failed");
            health_registry
                .set_unhealthy(components::COLLECTORS, e.to_string())
                .await;
            registry.stop_all().await;
            shutdown.cancel();
            return Err(e).context("collectors did not sync");
        }
    }

    let snapshot_loop = SnapshotLoop::new(
        store.clone(),
        lifecycle.clone(),
        Arc::new(LogSink),
        SnapshotConfig {
            interval: config.snapshot_interval(),
        },
        logger.clone(),
    );
    let snapshot_handle = tokio::spawn(snapshot_loop.run(shutdown.clone()));

    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            "SIGINT received".to_string()
        }
        _ = shutdown.cancelled() => format!("lifecycle: {}", lifecycle.status().state),
    };

    logger.log_shutdown(&reason);
    health_registry.set_ready(false).await;
    shutdown.cancel();

    if let Err(e) = snapshot_handle.await {
        warn!(error = %e, "Snapshot loop task failed");
    }
    registry.stop_all().await;

    match api_handle.await {
        Ok(Err(e)) => warn!(error = %format!("{:#}", e), "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
