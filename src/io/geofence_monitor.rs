//! Geofence service interface and an in-process region monitor
//!
//! `SoftwareGeofences` stands in for a platform geofencing API: watches are
//! checked against every published position fix and transitions are pushed
//! to the delivery channel given at construction. It mirrors the platform
//! behaviour the registrar relies on:
//! - a cap on simultaneously registered watches
//! - no event for a region the device is already inside at registration,
//!   unless the watch asks for an initial trigger
//! - registration is idempotent by watch id

use crate::domain::geo::distance_m;
use crate::domain::geofence::{GeofenceWatch, ProximityEvent, Transition};
use crate::domain::types::PositionFix;
use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[async_trait]
pub trait GeofenceService: Send + Sync {
    async fn register(&self, watch: &GeofenceWatch) -> anyhow::Result<()>;
    async fn unregister(&self, watch_id: &str) -> anyhow::Result<()>;
}

struct MonitoredWatch {
    watch: GeofenceWatch,
    /// Last known side of the boundary; None until the first fix after registration
    inside: Option<bool>,
    registered_at: Instant,
}

pub struct SoftwareGeofences {
    watches: Mutex<FxHashMap<String, MonitoredWatch>>,
    max_watches: usize,
    event_tx: mpsc::Sender<ProximityEvent>,
}

impl SoftwareGeofences {
    pub fn new(max_watches: usize, event_tx: mpsc::Sender<ProximityEvent>) -> Self {
        Self { watches: Mutex::new(FxHashMap::default()), max_watches, event_tx }
    }

    pub fn watch_count(&self) -> usize {
        self.watches.lock().len()
    }

    pub fn is_registered(&self, watch_id: &str) -> bool {
        self.watches.lock().contains_key(watch_id)
    }

    /// Evaluate all watches against a fix and deliver resulting transitions
    pub fn observe(&self, fix: &PositionFix) -> usize {
        let events = {
            let mut watches = self.watches.lock();
            watches.retain(|id, w| match w.watch.expiration {
                Some(ttl) if w.registered_at.elapsed() > ttl => {
                    debug!(watch_id = %id, "geofence_expired");
                    false
                }
                _ => true,
            });

            let mut events = Vec::new();
            for (id, monitored) in watches.iter_mut() {
                let distance = distance_m(fix.coordinates(), monitored.watch.center());
                let inside = distance <= f64::from(monitored.watch.radius_meters);

                let transition = match (monitored.inside, inside) {
                    (None, true) if monitored.watch.initial_trigger => Some(Transition::Enter),
                    (Some(false), true) => Some(Transition::Enter),
                    (Some(true), false) => Some(Transition::Exit),
                    _ => None,
                };
                monitored.inside = Some(inside);

                if let Some(t) = transition.filter(|t| monitored.watch.watches(*t)) {
                    debug!(
                        watch_id = %id,
                        transition = t.as_str(),
                        distance_m = format!("{:.1}", distance),
                        "geofence_transition"
                    );
                    events.push(ProximityEvent {
                        watch_id: id.clone(),
                        transition: t,
                        timestamp: fix.captured_at,
                    });
                }
            }
            events
        };

        let count = events.len();
        for event in events {
            match self.event_tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(e)) => {
                    warn!(watch_id = %e.watch_id, "geofence_event_dropped_channel_full");
                }
                Err(TrySendError::Closed(e)) => {
                    debug!(watch_id = %e.watch_id, "geofence_event_dropped_no_receiver");
                }
            }
        }
        count
    }

    /// Feed the monitor from a location state subscription until cancelled
    pub async fn run(&self, mut fixes: watch::Receiver<Option<PositionFix>>, shutdown: CancellationToken) {
        info!(max_watches = self.max_watches, "geofence_monitor_started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = fixes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let fix = *fixes.borrow_and_update();
                    if let Some(fix) = fix {
                        self.observe(&fix);
                    }
                }
            }
        }
        info!("geofence_monitor_stopped");
    }
}

#[async_trait]
impl GeofenceService for SoftwareGeofences {
    async fn register(&self, watch: &GeofenceWatch) -> anyhow::Result<()> {
        let mut watches = self.watches.lock();
        if !watches.contains_key(&watch.id) && watches.len() >= self.max_watches {
            bail!("geofence limit of {} watches reached", self.max_watches);
        }
        watches.insert(
            watch.id.clone(),
            MonitoredWatch { watch: watch.clone(), inside: None, registered_at: Instant::now() },
        );
        Ok(())
    }

    async fn unregister(&self, watch_id: &str) -> anyhow::Result<()> {
        if self.watches.lock().remove(watch_id).is_none() {
            debug!(watch_id = %watch_id, "geofence_unregister_unknown");
        }
        Ok(())
    }
}
