//! Proximity daemon - background location tracking with establishment geofences
//!
//! Tracks the device position, keeps geofences on the closest establishments
//! and shows a notification when one is entered during the notification window.
//!
//! Module structure:
//! - `domain/` - Core types (PositionFix, EstablishmentCandidate, GeofenceWatch)
//! - `io/` - External interfaces (gpsd, replay, geofences, document store, notifier)
//! - `services/` - Engine logic (PositionStream, runner, registrar, review gate)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use proximity_engine::infra::{Config, LocationSource, Metrics, NotificationSink};
use proximity_engine::io::{
    GpsdProvider, HttpDocumentStore, JsonlNotifier, LocationProvider, LogIndicator, LogNotifier, Notifier,
    ReplayProvider, SoftwareGeofences,
};
use proximity_engine::services::{ProximityEngine, ProximityEventHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Geofence events buffered between monitor and handler
const EVENT_BUFFER: usize = 256;

/// Proximity daemon - establishment geofencing around the device position
#[derive(Parser, Debug)]
#[command(name = "proximity-daemon", version, about)]
struct Args {
    /// Path to TOML configuration file [default: $CONFIG_FILE, then config/dev.toml]
    #[arg(short, long)]
    config: Option<String>,
}

fn location_provider(config: &Config) -> anyhow::Result<Arc<dyn LocationProvider>> {
    let provider: Arc<dyn LocationProvider> = match config.location_source() {
        LocationSource::Gpsd => {
            Arc::new(GpsdProvider::new(config.gpsd_addr(), config.location_permission_granted()))
        }
        LocationSource::Replay => Arc::new(
            ReplayProvider::from_file(config.replay_file())?
                .with_permission(config.location_permission_granted()),
        ),
    };
    Ok(provider)
}

fn notifier(config: &Config) -> Arc<dyn Notifier> {
    match config.notification_sink() {
        NotificationSink::Log => Arc::new(LogNotifier),
        NotificationSink::Jsonl => Arc::new(JsonlNotifier::new(config.notification_file())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-watch and per-event detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "proximity-daemon starting");

    let args = Args::parse();
    let config = Config::load_from_path(&Config::config_path(args.config));

    info!(
        config_file = %config.config_file(),
        location_source = ?config.location_source(),
        update_interval = ?config.update_interval(),
        geofence_radius_m = config.geofence_radius_m(),
        geofence_top_n = config.geofence_top_n(),
        notification_window = ?config.notification_window(),
        store_base_url = %config.store_base_url(),
        "config_loaded"
    );

    let metrics = Arc::new(Metrics::new());
    let provider = location_provider(&config).context("Failed to set up location provider")?;
    let store = Arc::new(
        HttpDocumentStore::new(config.store_base_url(), config.store_timeout(), config.store_api_key())
            .context("Failed to set up document store client")?,
    );

    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let geofences = Arc::new(SoftwareGeofences::new(config.geofence_max_watches(), event_tx));

    let engine = ProximityEngine::new(
        &config,
        provider,
        geofences.clone(),
        store,
        Arc::new(LogIndicator::new()),
        metrics.clone(),
    );

    let shutdown = CancellationToken::new();

    // Geofence monitor follows location state
    let monitor = {
        let geofences = geofences.clone();
        let fixes = engine.location_state().subscribe();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { geofences.run(fixes, shutdown).await })
    };

    // Event handler runs until the monitor's sender is gone
    let handler = ProximityEventHandler::new(&config, notifier(&config), metrics.clone());
    let handler_task = tokio::spawn(async move { handler.run(event_rx).await });

    // Periodic metrics summary
    let reporter = {
        let metrics = metrics.clone();
        let geofences = geofences.clone();
        let shutdown = shutdown.clone();
        let period = Duration::from_secs(config.metrics_interval_secs());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => metrics.report(geofences.watch_count()).log(),
                }
            }
        })
    };

    engine.start_background_tracking().await;

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("shutdown_signal_received");

    engine.stop_background_tracking().await;
    shutdown.cancel();
    for (name, task) in [("geofence_monitor", monitor), ("metrics_reporter", reporter)] {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "task_join_failed");
        }
    }

    // Closes the event channel so the handler drains and exits
    drop(engine);
    drop(geofences);
    if let Err(e) = handler_task.await {
        error!(task = "proximity_event_handler", error = %e, "task_join_failed");
    }

    metrics.report(0).log();
    info!("proximity-daemon shutdown complete");
    Ok(())
}
