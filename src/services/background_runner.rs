//! Supervised background location tracking
//!
//! While the runner is active a tracking indicator is visible and every fix
//! from its own `PositionStream` is published into `LocationState`.
//! `stop()` joins the tracking task before returning, so once it returns no
//! further location write can happen.

use crate::infra::metrics::Metrics;
use crate::io::location_provider::LocationProvider;
use crate::io::notifier::TrackingIndicator;
use crate::services::location_state::LocationState;
use crate::services::position_stream::{PositionFixes, PositionStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const INDICATOR_TITLE: &str = "Tracking location...";
pub const INDICATOR_TEXT: &str = "Tracking location.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Stopped,
    /// Task running, no fix yet
    Starting,
    Tracking,
}

impl RunnerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerState::Stopped => "stopped",
            RunnerState::Starting => "starting",
            RunnerState::Tracking => "tracking",
        }
    }
}

struct Running {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

pub struct BackgroundLocationRunner {
    provider: Arc<dyn LocationProvider>,
    location: Arc<LocationState>,
    indicator: Arc<dyn TrackingIndicator>,
    update_interval: Duration,
    metrics: Arc<Metrics>,
    state: Arc<watch::Sender<RunnerState>>,
    /// Serializes start/stop
    running: tokio::sync::Mutex<Option<Running>>,
}

impl BackgroundLocationRunner {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        location: Arc<LocationState>,
        indicator: Arc<dyn TrackingIndicator>,
        update_interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            provider,
            location,
            indicator,
            update_interval,
            metrics,
            state: Arc::new(watch::channel(RunnerState::Stopped).0),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }

    /// Follows state changes, including the runner stopping on its own
    pub fn watch_state(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    /// Start tracking. Returns false if the runner was already active.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if self.state() != RunnerState::Stopped {
            return false;
        }

        // A task that ended on a stream failure is already finished; reap it
        if let Some(previous) = running.take() {
            previous.shutdown.cancel();
            if let Err(e) = previous.task.await {
                warn!(error = %e, "location_runner_previous_task_failed");
            }
        }

        self.state.send_replace(RunnerState::Starting);
        self.indicator.show(INDICATOR_TITLE);

        let fixes = PositionStream::new(self.provider.clone())
            .with_metrics(self.metrics.clone())
            .positions(self.update_interval);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(track(
            fixes,
            self.location.clone(),
            self.indicator.clone(),
            self.state.clone(),
            self.metrics.clone(),
            shutdown.clone(),
        ));
        *running = Some(Running { shutdown, task });

        info!(interval = ?self.update_interval, "location_runner_started");
        true
    }

    /// Stop tracking and wait for the task to finish; idempotent
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(active) = running.take() else {
            return;
        };

        active.shutdown.cancel();
        if let Err(e) = active.task.await {
            error!(error = %e, "location_runner_task_panicked");
        }
        self.indicator.remove();
        self.state.send_replace(RunnerState::Stopped);
        info!("location_runner_stopped");
    }
}

async fn track(
    mut fixes: PositionFixes,
    location: Arc<LocationState>,
    indicator: Arc<dyn TrackingIndicator>,
    state: Arc<watch::Sender<RunnerState>>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = fixes.next() => match next {
                Some(Ok(fix)) => {
                    location.replace(fix);
                    metrics.record_fix();

                    let first_fix = state.send_if_modified(|current| {
                        let starting = *current == RunnerState::Starting;
                        if starting {
                            *current = RunnerState::Tracking;
                        }
                        starting
                    });
                    if first_fix {
                        if !indicator.has_text() {
                            indicator.set_text(INDICATOR_TEXT);
                        }
                        info!(lat = fix.latitude, lon = fix.longitude, "location_runner_first_fix");
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "location_runner_stream_failed");
                    indicator.remove();
                    state.send_replace(RunnerState::Stopped);
                    break;
                }
                None => {
                    warn!("location_runner_stream_ended");
                    indicator.remove();
                    state.send_replace(RunnerState::Stopped);
                    break;
                }
            }
        }
    }
    fixes.cancel();
}
