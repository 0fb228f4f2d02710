//! AppClass controller
//!
//! Watches AppClass resources and workload snapshots, reconciles each
//! resource into a classification status, and serves health, metrics, and
//! status over HTTP.

use anyhow::Result;
use appclass_controller::{api, config::ControllerConfig, source::FileSource};
use appclass_lib::{
    health::{components, HealthRegistry},
    ControllerMetrics, InMemoryStatusStore, ReconcileDriverBuilder, StaticAttributeProvider,
    StructuredLogger,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = ControllerConfig::load()?;
    info!(
        resources = %config.resources_path.display(),
        api_port = config.api_port,
        "Controller configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::DRIVER).await;
    health_registry.register(components::PROVIDER).await;
    health_registry.register(components::STORE).await;

    let metrics = ControllerMetrics::new();
    let logger = StructuredLogger::new("appclass-controller");
    logger.log_startup(CONTROLLER_VERSION);

    let provider = Arc::new(StaticAttributeProvider::new());
    let store = Arc::new(InMemoryStatusStore::new());

    let driver = ReconcileDriverBuilder::new()
        .provider(provider.clone())
        .store(store.clone())
        .health(health_registry.clone())
        .config(config.driver_config())
        .build()?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let (events_tx, events_rx) = mpsc::channel(256);
    let (membership_tx, membership_rx) = mpsc::channel(256);

    let driver_handle =
        tokio::spawn(driver.run(events_rx, membership_rx, shutdown_tx.subscribe()));

    // Initial load: snapshots first so the first passes see attributes
    let mut source = FileSource::new(
        config.resources_path.clone(),
        config.snapshots_path.clone(),
        provider,
    );
    source.sync_snapshots(&membership_tx).await?;
    source.sync_resources(&events_tx).await?;
    let watcher = source.watch(events_tx, membership_tx, shutdown_tx.subscribe())?;

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics, store));
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Err(e)) => warn!(error = %e, "API server stopped"),
                Err(e) => warn!(error = %e, "API server task failed"),
                Ok(Ok(())) => {}
            }
            logger.log_shutdown("API server stopped");
        }
    }

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());
    watcher.join().await;
    if let Err(e) = driver_handle.await {
        warn!(error = %e, "Driver task failed");
    }
    info!("Shutdown complete");

    Ok(())
}
