pub mod bridge;
pub mod db;
pub mod hub;
pub mod maintenance;
pub mod metrics;
pub mod server;
pub mod settings;
pub mod simulator;
mod utils;

use anyhow::{Context, Result};
use bridge::{BridgeController, BridgeState};
use db::Database;
use hub::Hub;
use log::{error, info, warn};
use maintenance::MaintenanceController;
use metrics::MetricsCollector;
use settings::BridgeSettings;
use simulator::SimulatorController;
use tokio::{net::TcpListener, sync::watch};
use tokio_util::sync::CancellationToken;

/// Everything request handlers need, built once in `run` and passed down.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub hub: Hub,
    pub metrics: MetricsCollector,
    pub bridge_state: watch::Receiver<BridgeState>,
}

/// Process entry point: starts every component, serves until Ctrl-C, then tears
/// down in reverse dependency order.
pub async fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Compressor bridge starting up...");

    let settings = BridgeSettings::load().context("failed to load settings")?;
    let database = Database::new(settings.storage.path.clone())?;
    let hub = Hub::new();
    let metrics = MetricsCollector::new();

    let mut bridge = BridgeController::new();
    bridge.start(
        settings.mqtt.clone(),
        database.clone(),
        hub.clone(),
        metrics.clone(),
    )?;

    let mut maintenance = MaintenanceController::new();
    maintenance.start(
        database.clone(),
        settings.storage.retention(),
        settings.storage.maintenance_interval(),
        metrics.clone(),
    )?;

    let mut simulator = SimulatorController::new();
    if settings.simulator.enabled {
        simulator.start(settings.mqtt.clone(), settings.simulator.interval())?;
    } else {
        info!("Simulator disabled; waiting for device data");
    }

    let state = AppState {
        db: database.clone(),
        hub,
        metrics,
        bridge_state: bridge.subscribe_state(),
    };

    let listener = TcpListener::bind(settings.http_bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.http_bind))?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown requested"),
                Err(err) => error!("Failed to listen for Ctrl-C: {err}"),
            }
            shutdown.cancel();
        });
    }

    let served = server::serve(listener, state, shutdown).await;

    if let Err(err) = simulator.stop().await {
        warn!("Simulator did not stop cleanly: {err:?}");
    }
    if let Err(err) = bridge.stop().await {
        warn!("Bridge did not stop cleanly: {err:?}");
    }
    if let Err(err) = maintenance.stop().await {
        warn!("Maintenance did not stop cleanly: {err:?}");
    }

    // Last handle: joins the database thread.
    drop(database);
    info!("Compressor bridge stopped");

    served
}
