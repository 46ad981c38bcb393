//! Handling of "entered region" events from the geofence service
//!
//! Each event is handled on its own, with no memory of earlier ones:
//! an Enter inside the local-time notification window produces exactly one
//! notification; anything else is dropped without a trace beyond a debug log.
//! Repeated entries into the same region each notify again.

use crate::domain::geofence::{establishment_id, ProximityEvent, Transition};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::notifier::Notifier;
use chrono::{FixedOffset, Local, Offset, Timelike, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Inclusive range of local hours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl NotificationWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self { start_hour, end_hour }
    }

    pub fn contains(&self, hour: u32) -> bool {
        (self.start_hour..=self.end_hour).contains(&hour)
    }
}

/// Where local wall-clock time comes from
#[derive(Debug, Clone, Copy)]
pub enum LocalClock {
    Fixed(FixedOffset),
    /// System time zone, looked up per event
    System,
}

impl LocalClock {
    fn hour_of(&self, at: chrono::DateTime<Utc>) -> u32 {
        match self {
            LocalClock::Fixed(offset) => at.with_timezone(offset).hour(),
            LocalClock::System => at.with_timezone(&Local).hour(),
        }
    }
}

/// What happened to one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Notified,
    OutsideWindow,
    /// Not an Enter transition
    Ignored,
}

pub struct ProximityEventHandler {
    window: NotificationWindow,
    clock: LocalClock,
    title: String,
    body: String,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
}

impl ProximityEventHandler {
    pub fn new(config: &Config, notifier: Arc<dyn Notifier>, metrics: Arc<Metrics>) -> Self {
        let (start_hour, end_hour) = config.notification_window();
        let clock = match config.notification_utc_offset_minutes() {
            Some(minutes) => LocalClock::Fixed(
                FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| Utc.fix()),
            ),
            None => LocalClock::System,
        };
        Self {
            window: NotificationWindow::new(start_hour, end_hour),
            clock,
            title: config.notification_title().to_string(),
            body: config.notification_body().to_string(),
            notifier,
            metrics,
        }
    }

    pub fn handle(&self, event: &ProximityEvent) -> Dispatch {
        self.metrics.record_proximity_event();

        if event.transition != Transition::Enter {
            debug!(watch_id = %event.watch_id, transition = event.transition.as_str(), "proximity_event_ignored");
            return Dispatch::Ignored;
        }

        let hour = self.clock.hour_of(event.timestamp);
        if !self.window.contains(hour) {
            self.metrics.record_notification_suppressed();
            debug!(
                watch_id = %event.watch_id,
                local_hour = hour,
                window_start = self.window.start_hour,
                window_end = self.window.end_hour,
                "proximity_notification_outside_window"
            );
            return Dispatch::OutsideWindow;
        }

        self.notifier.show(&self.title, &self.body);
        self.metrics.record_notification();
        info!(
            watch_id = %event.watch_id,
            establishment_id = establishment_id(&event.watch_id).unwrap_or("unknown"),
            local_hour = hour,
            "proximity_notification_dispatched"
        );
        Dispatch::Notified
    }

    /// Handle events until the delivery channel closes
    pub async fn run(&self, mut event_rx: mpsc::Receiver<ProximityEvent>) {
        info!("proximity_event_handler_started");
        while let Some(event) = event_rx.recv().await {
            self.handle(&event);
        }
        info!("proximity_event_handler_stopped");
    }
}
