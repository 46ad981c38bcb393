//! Keeps the geofence service watching the establishments closest to the user
//!
//! `GeofenceRegistrar` owns the set of registered watch ids and reconciles it
//! against a desired set with the minimum number of service calls.
//! `GeofenceRefresher` decides what the desired set is: the top-N closest
//! candidates around the latest fix, re-synced only when membership changes.

use crate::domain::geofence::GeofenceWatch;
use crate::domain::types::{Coordinates, EstablishmentCandidate};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::document_store::DocumentStore;
use crate::io::geofence_monitor::GeofenceService;
use crate::services::location_state::LocationState;
use crate::services::proximity_index::top_n;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub registered: usize,
    pub unregistered: usize,
    pub unchanged: usize,
    pub failures: usize,
}

pub struct GeofenceRegistrar {
    service: Arc<dyn GeofenceService>,
    registered: tokio::sync::Mutex<BTreeSet<String>>,
    metrics: Arc<Metrics>,
}

impl GeofenceRegistrar {
    pub fn new(service: Arc<dyn GeofenceService>, metrics: Arc<Metrics>) -> Self {
        Self { service, registered: tokio::sync::Mutex::new(BTreeSet::new()), metrics }
    }

    /// Make the registered set equal to `desired`.
    ///
    /// Ids in both sets are left alone. A failed registration is not recorded,
    /// so the next sync retries it; a failed unregistration stays recorded.
    pub async fn sync(&self, desired: Vec<GeofenceWatch>) -> SyncReport {
        let mut registered = self.registered.lock().await;
        let desired_ids: BTreeSet<&str> = desired.iter().map(|w| w.id.as_str()).collect();
        let mut report = SyncReport::default();

        let stale: Vec<String> =
            registered.iter().filter(|id| !desired_ids.contains(id.as_str())).cloned().collect();
        for id in stale {
            match self.service.unregister(&id).await {
                Ok(()) => {
                    registered.remove(&id);
                    report.unregistered += 1;
                    debug!(watch_id = %id, "geofence_unregistered");
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(watch_id = %id, error = %e, "geofence_unregister_failed");
                }
            }
        }

        for watch in &desired {
            if registered.contains(&watch.id) {
                report.unchanged += 1;
                continue;
            }
            match self.service.register(watch).await {
                Ok(()) => {
                    registered.insert(watch.id.clone());
                    report.registered += 1;
                    debug!(watch_id = %watch.id, radius_m = watch.radius_meters, "geofence_registered");
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(watch_id = %watch.id, error = %e, "geofence_register_failed");
                }
            }
        }

        self.metrics.record_geofence_sync(
            report.registered as u64,
            report.unregistered as u64,
            report.failures as u64,
        );
        info!(
            registered = report.registered,
            unregistered = report.unregistered,
            unchanged = report.unchanged,
            failures = report.failures,
            total = registered.len(),
            "geofence_sync_complete"
        );
        report
    }

    /// Unregister every watch
    pub async fn clear(&self) -> SyncReport {
        self.sync(Vec::new()).await
    }

    pub async fn registered_ids(&self) -> Vec<String> {
        self.registered.lock().await.iter().cloned().collect()
    }

    pub async fn registered_count(&self) -> usize {
        self.registered.lock().await.len()
    }
}

/// Watches for the `n` candidates closest to `origin`
pub fn closest_watches(
    origin: Coordinates,
    candidates: &[EstablishmentCandidate],
    n: usize,
    radius_meters: f32,
) -> Vec<GeofenceWatch> {
    top_n(origin, candidates.iter().cloned(), n)
        .iter()
        .map(|ranked| GeofenceWatch::for_establishment(&ranked.candidate, radius_meters))
        .collect()
}

/// Drives the registrar from location updates and candidate refreshes
pub struct GeofenceRefresher {
    store: Arc<dyn DocumentStore>,
    registrar: Arc<GeofenceRegistrar>,
    location: Arc<LocationState>,
    metrics: Arc<Metrics>,
    radius_meters: f32,
    top_n: usize,
    refresh_interval: Duration,
}

/// Mutable state of one refresher run
#[derive(Default)]
struct RefreshState {
    candidates: Vec<EstablishmentCandidate>,
    /// Watch ids of the last fully successful sync
    synced: Option<BTreeSet<String>>,
}

impl GeofenceRefresher {
    pub fn new(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        registrar: Arc<GeofenceRegistrar>,
        location: Arc<LocationState>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            registrar,
            location,
            metrics,
            radius_meters: config.geofence_radius_m(),
            top_n: config.geofence_top_n(),
            refresh_interval: config.candidate_refresh_interval(),
        }
    }

    /// Run until cancelled. Candidates are fetched immediately, then every
    /// refresh interval; every new fix re-evaluates the closest set.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut fixes = self.location.subscribe();
        let mut refresh = interval(self.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state = RefreshState::default();

        info!(
            top_n = self.top_n,
            radius_m = self.radius_meters,
            refresh_secs = self.refresh_interval.as_secs(),
            "geofence_refresher_started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = refresh.tick() => {
                    if let Some(candidates) = self.fetch_candidates().await {
                        state.candidates = candidates;
                        let fix = *fixes.borrow();
                        if let Some(fix) = fix {
                            self.resync(fix.coordinates(), &mut state).await;
                        }
                    }
                }
                changed = fixes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let fix = *fixes.borrow_and_update();
                    if let Some(fix) = fix {
                        self.resync(fix.coordinates(), &mut state).await;
                    }
                }
            }
        }

        info!("geofence_refresher_stopped");
    }

    /// None on failure; the caller keeps its previous snapshot
    async fn fetch_candidates(&self) -> Option<Vec<EstablishmentCandidate>> {
        match self.store.establishments().await {
            Ok(candidates) => {
                debug!(count = candidates.len(), "geofence_candidates_refreshed");
                Some(candidates)
            }
            Err(e) => {
                self.metrics.record_remote_fetch_failure();
                warn!(error = %format!("{:#}", e), "geofence_candidates_fetch_failed");
                None
            }
        }
    }

    async fn resync(&self, origin: Coordinates, state: &mut RefreshState) {
        let watches = closest_watches(origin, &state.candidates, self.top_n, self.radius_meters);
        let membership: BTreeSet<String> = watches.iter().map(|w| w.id.clone()).collect();
        if state.synced.as_ref() == Some(&membership) {
            return;
        }

        let report = self.registrar.sync(watches).await;
        // Retry on the next fix if anything failed
        state.synced = (report.failures == 0).then_some(membership);
    }
}
