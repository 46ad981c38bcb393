//! Engine facade: background tracking, ranking and review eligibility
//!
//! Owns the shared `LocationState` and every long-lived task that feeds from
//! it. Geofence registration lives exactly as long as a tracking session:
//! the refresher starts on the runner's first fix and its fences are removed
//! when the runner stops, whether it was asked to or its stream failed.
//! Geofence events are not handled here; the service delivers them to
//! the channel it was built with, and the caller runs the event handler.

use crate::domain::types::{Coordinates, RankedCandidate, ReviewAttempt};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::document_store::{last_review_at, DocumentStore};
use crate::io::geofence_monitor::GeofenceService;
use crate::io::location_provider::LocationProvider;
use crate::io::notifier::TrackingIndicator;
use crate::services::background_runner::{BackgroundLocationRunner, RunnerState};
use crate::services::geofence_registrar::{GeofenceRefresher, GeofenceRegistrar};
use crate::services::location_state::LocationState;
use crate::services::proximity_index::top_n;
use crate::services::review_gate::{Eligibility, ReviewEligibilityGate};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct RefreshTask {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ProximityEngine {
    location: Arc<LocationState>,
    store: Arc<dyn DocumentStore>,
    runner: BackgroundLocationRunner,
    registrar: Arc<GeofenceRegistrar>,
    refresher: Arc<GeofenceRefresher>,
    /// Held across a whole start or stop sequence
    lifecycle: tokio::sync::Mutex<Option<RefreshTask>>,
    gate: ReviewEligibilityGate,
    default_anchor: Coordinates,
    metrics: Arc<Metrics>,
}

impl ProximityEngine {
    pub fn new(
        config: &Config,
        provider: Arc<dyn LocationProvider>,
        geofences: Arc<dyn GeofenceService>,
        store: Arc<dyn DocumentStore>,
        indicator: Arc<dyn TrackingIndicator>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let location = Arc::new(LocationState::new());
        let runner = BackgroundLocationRunner::new(
            provider,
            location.clone(),
            indicator,
            config.update_interval(),
            metrics.clone(),
        );
        let registrar = Arc::new(GeofenceRegistrar::new(geofences, metrics.clone()));
        let refresher = Arc::new(GeofenceRefresher::new(
            config,
            store.clone(),
            registrar.clone(),
            location.clone(),
            metrics.clone(),
        ));

        Self {
            location,
            store,
            runner,
            registrar,
            refresher,
            lifecycle: tokio::sync::Mutex::new(None),
            gate: ReviewEligibilityGate::new(config.review_cooldown(), config.review_max_distance_m()),
            default_anchor: config.default_anchor(),
            metrics,
        }
    }

    pub fn location_state(&self) -> Arc<LocationState> {
        self.location.clone()
    }

    pub fn tracking_state(&self) -> RunnerState {
        self.runner.state()
    }

    pub async fn registered_geofences(&self) -> Vec<String> {
        self.registrar.registered_ids().await
    }

    /// Start the location runner and the geofence refresher; no-op if running
    pub async fn start_background_tracking(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.runner.state() != RunnerState::Stopped {
            debug!("background_tracking_already_running");
            return;
        }

        // Left over from a session whose runner stopped on its own
        if let Some(previous) = lifecycle.take() {
            finish_refresh(previous).await;
        }
        self.runner.start().await;

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(follow_runner(
            self.refresher.clone(),
            self.registrar.clone(),
            self.runner.watch_state(),
            shutdown.clone(),
        ));
        *lifecycle = Some(RefreshTask { shutdown, task });
        info!("background_tracking_started");
    }

    /// Stop tracking and remove every registered geofence; idempotent
    pub async fn stop_background_tracking(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.runner.stop().await;

        if let Some(refresh) = lifecycle.take() {
            finish_refresh(refresh).await;
        }

        let report = self.registrar.clear().await;
        info!(unregistered = report.unregistered, failures = report.failures, "background_tracking_stopped");
    }

    /// Establishments closest to the current fix, or to the default anchor
    /// when there is none. A store failure yields an empty list.
    pub async fn current_ranked_establishments(&self, limit: usize) -> Vec<RankedCandidate> {
        let origin = match self.location.current() {
            Some(fix) => fix.coordinates(),
            None => {
                debug!(anchor = %self.default_anchor, "ranking_from_default_anchor");
                self.default_anchor
            }
        };

        match self.store.establishments().await {
            Ok(candidates) => top_n(origin, candidates, limit),
            Err(e) => {
                self.metrics.record_remote_fetch_failure();
                warn!(error = %format!("{:#}", e), "ranking_candidates_fetch_failed");
                Vec::new()
            }
        }
    }

    /// Full verdict for a review attempt at the current position
    pub async fn review_eligibility(&self, establishment_id: &str, user_id: &str) -> anyhow::Result<Eligibility> {
        let fix = self.location.current().context("no position fix available")?;

        let establishment = self
            .store
            .establishment(establishment_id)
            .await
            .inspect_err(|_| self.metrics.record_remote_fetch_failure())
            .with_context(|| format!("Failed to fetch establishment {}", establishment_id))?
            .with_context(|| format!("establishment {} not found", establishment_id))?;

        let prior_review_at = last_review_at(self.store.as_ref(), establishment_id, user_id)
            .await
            .inspect_err(|_| self.metrics.record_remote_fetch_failure())
            .with_context(|| format!("Failed to fetch reviews of {} by {}", establishment_id, user_id))?;

        let attempt = ReviewAttempt {
            establishment_id: establishment_id.to_string(),
            user_id: user_id.to_string(),
            user_position: fix,
            prior_review_at,
        };
        Ok(self.gate.evaluate(&attempt, establishment.coordinates(), Utc::now()))
    }

    /// Whether the user may review the establishment now. Denies when the
    /// position, the establishment or the review history is unavailable.
    pub async fn can_user_review(&self, establishment_id: &str, user_id: &str) -> bool {
        let allowed = match self.review_eligibility(establishment_id, user_id).await {
            Ok(verdict) => {
                info!(
                    establishment_id = %establishment_id,
                    user_id = %user_id,
                    verdict = verdict.as_str(),
                    "review_eligibility_checked"
                );
                verdict.is_allowed()
            }
            Err(e) => {
                warn!(
                    establishment_id = %establishment_id,
                    user_id = %user_id,
                    error = %format!("{:#}", e),
                    "review_eligibility_unavailable"
                );
                false
            }
        };
        self.metrics.record_review_check(allowed);
        allowed
    }
}

async fn finish_refresh(refresh: RefreshTask) {
    refresh.shutdown.cancel();
    if let Err(e) = refresh.task.await {
        error!(error = %e, "geofence_refresher_task_panicked");
    }
}

/// Geofence upkeep for one tracking session
async fn follow_runner(
    refresher: Arc<GeofenceRefresher>,
    registrar: Arc<GeofenceRegistrar>,
    mut states: watch::Receiver<RunnerState>,
    shutdown: CancellationToken,
) {
    let tracking = tokio::select! {
        _ = shutdown.cancelled() => false,
        tracking = first_fix_arrived(&mut states) => tracking,
    };

    if tracking {
        let session = shutdown.child_token();
        let runner_ended = async {
            tokio::select! {
                _ = session.cancelled() => {}
                _ = runner_stopped(&mut states) => {
                    debug!("geofence_session_runner_stopped");
                    session.cancel();
                }
            }
        };
        tokio::join!(refresher.run(session.clone()), runner_ended);
    } else {
        debug!("geofence_refresher_not_started");
    }

    let report = registrar.clear().await;
    if report.unregistered > 0 || report.failures > 0 {
        info!(
            unregistered = report.unregistered,
            failures = report.failures,
            "geofence_session_cleared"
        );
    }
}

/// False when the runner stopped before publishing a fix
async fn first_fix_arrived(states: &mut watch::Receiver<RunnerState>) -> bool {
    match states.wait_for(|s| *s != RunnerState::Starting).await {
        Ok(state) => *state == RunnerState::Tracking,
        Err(_) => false,
    }
}

async fn runner_stopped(states: &mut watch::Receiver<RunnerState>) {
    // A dropped runner counts as stopped
    let _ = states.wait_for(|s| *s == RunnerState::Stopped).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geofence::GeofenceWatch;
    use crate::domain::types::{EstablishmentCandidate, PositionFix};
    use crate::io::document_store::ReviewRecord;
    use crate::io::notifier::LogIndicator;
    use crate::io::replay::ReplayProvider;
    use anyhow::bail;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeStore {
        establishments: Vec<EstablishmentCandidate>,
        reviews: Vec<ReviewRecord>,
        unreachable: bool,
    }

    #[async_trait]
    impl DocumentStore for FakeStore {
        async fn establishments(&self) -> anyhow::Result<Vec<EstablishmentCandidate>> {
            if self.unreachable {
                bail!("connection refused");
            }
            Ok(self.establishments.clone())
        }

        async fn establishment(&self, id: &str) -> anyhow::Result<Option<EstablishmentCandidate>> {
            if self.unreachable {
                bail!("connection refused");
            }
            Ok(self.establishments.iter().find(|e| e.id == id).cloned())
        }

        async fn reviews_by(&self, establishment_id: &str, user_id: &str) -> anyhow::Result<Vec<ReviewRecord>> {
            Ok(self
                .reviews
                .iter()
                .filter(|r| r.establishment_id == establishment_id && r.user_id == user_id)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeGeofences {
        active: Mutex<BTreeSet<String>>,
    }

    #[async_trait]
    impl GeofenceService for FakeGeofences {
        async fn register(&self, watch: &GeofenceWatch) -> anyhow::Result<()> {
            self.active.lock().insert(watch.id.clone());
            Ok(())
        }

        async fn unregister(&self, watch_id: &str) -> anyhow::Result<()> {
            self.active.lock().remove(watch_id);
            Ok(())
        }
    }

    fn engine_with(store: FakeStore, track: Vec<Coordinates>) -> (ProximityEngine, Arc<FakeGeofences>) {
        engine_with_provider(store, ReplayProvider::from_points(track))
    }

    fn engine_with_provider(store: FakeStore, provider: ReplayProvider) -> (ProximityEngine, Arc<FakeGeofences>) {
        let geofences = Arc::new(FakeGeofences::default());
        let config = Config::default().with_update_interval_ms(10);
        let engine = ProximityEngine::new(
            &config,
            Arc::new(provider),
            geofences.clone(),
            Arc::new(store),
            Arc::new(LogIndicator::new()),
            Arc::new(Metrics::new()),
        );
        (engine, geofences)
    }

    fn cafe(id: &str, lat: f64, lon: f64) -> EstablishmentCandidate {
        EstablishmentCandidate::new(id, format!("Cafe {}", id), lat, lon)
    }

    #[tokio::test]
    async fn test_ranking_falls_back_to_anchor() {
        let store = FakeStore {
            establishments: vec![cafe("porto", 41.1496, -8.6110), cafe("lisbon", 38.7223, -9.1394)],
            ..Default::default()
        };
        let (engine, _) = engine_with(store, Vec::new());

        let ranked = engine.current_ranked_establishments(10).await;
        assert_eq!(ranked[0].candidate.id, "lisbon");
        assert!(ranked[0].distance_meters < 20.0);
    }

    #[tokio::test]
    async fn test_ranking_uses_current_fix_and_limit() {
        let store = FakeStore {
            establishments: vec![cafe("porto", 41.1496, -8.6110), cafe("lisbon", 38.7223, -9.1394)],
            ..Default::default()
        };
        let (engine, _) = engine_with(store, Vec::new());
        engine.location_state().replace(PositionFix::now(41.1500, -8.6100));

        let ranked = engine.current_ranked_establishments(1).await;
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].candidate.id, "porto");
    }

    #[tokio::test]
    async fn test_ranking_store_failure_is_empty() {
        let (engine, _) = engine_with(FakeStore { unreachable: true, ..Default::default() }, Vec::new());
        assert!(engine.current_ranked_establishments(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_review_denied_without_fix() {
        let store = FakeStore { establishments: vec![cafe("e1", 38.7169, -9.1393)], ..Default::default() };
        let (engine, _) = engine_with(store, Vec::new());

        assert!(!engine.can_user_review("e1", "u1").await);
        assert!(engine.review_eligibility("e1", "u1").await.is_err());
    }

    #[tokio::test]
    async fn test_review_allowed_nearby_without_history() {
        let store = FakeStore { establishments: vec![cafe("e1", 38.7169, -9.1394)], ..Default::default() };
        let (engine, _) = engine_with(store, Vec::new());
        engine.location_state().replace(PositionFix::now(38.7169, -9.1393));

        assert!(engine.can_user_review("e1", "u1").await);
    }

    #[tokio::test]
    async fn test_review_cooling_down() {
        let store = FakeStore {
            establishments: vec![cafe("e1", 38.7169, -9.1394)],
            reviews: vec![ReviewRecord {
                id: "r1".into(),
                establishment_id: "e1".into(),
                user_id: "u1".into(),
                rating: 4,
                created_at: Utc::now() - chrono::Duration::minutes(5),
            }],
            ..Default::default()
        };
        let (engine, _) = engine_with(store, Vec::new());
        engine.location_state().replace(PositionFix::now(38.7169, -9.1393));

        let verdict = engine.review_eligibility("e1", "u1").await.unwrap();
        assert!(matches!(verdict, Eligibility::CoolingDown { .. }));
        // Another user is unaffected
        assert!(engine.can_user_review("e1", "u2").await);
    }

    #[tokio::test]
    async fn test_review_denied_for_unknown_establishment() {
        let (engine, _) = engine_with(FakeStore::default(), Vec::new());
        engine.location_state().replace(PositionFix::now(38.7169, -9.1393));

        assert!(!engine.can_user_review("missing", "u1").await);
    }

    #[tokio::test]
    async fn test_tracking_registers_and_stop_clears_geofences() {
        let store = FakeStore { establishments: vec![cafe("e1", 38.7169, -9.1393)], ..Default::default() };
        let track = vec![Coordinates::new(38.7300, -9.1393); 500];
        let (engine, geofences) = engine_with(store, track);

        engine.start_background_tracking().await;
        for _ in 0..200 {
            if !geofences.active.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(engine.location_state().current().is_some());
        assert_eq!(engine.registered_geofences().await, vec!["establishment:e1".to_string()]);

        engine.stop_background_tracking().await;
        assert_eq!(engine.tracking_state(), RunnerState::Stopped);
        assert!(geofences.active.lock().is_empty());
        assert!(engine.registered_geofences().await.is_empty());
    }

    #[tokio::test]
    async fn test_runner_failure_leaves_no_geofences_for_stale_fix() {
        let store = FakeStore { establishments: vec![cafe("e1", 38.7169, -9.1393)], ..Default::default() };
        let provider =
            ReplayProvider::from_points(vec![Coordinates::new(38.7169, -9.1393); 50]).with_permission(false);
        let (engine, geofences) = engine_with_provider(store, provider);
        // Fix left over from an earlier session
        engine.location_state().replace(PositionFix::now(38.7169, -9.1393));

        engine.start_background_tracking().await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(engine.tracking_state(), RunnerState::Stopped);
        assert!(engine.registered_geofences().await.is_empty());
        assert!(geofences.active.lock().is_empty());

        engine.stop_background_tracking().await;
        assert!(geofences.active.lock().is_empty());
    }

    #[tokio::test]
    async fn test_restart_registers_geofences_again() {
        let store = FakeStore { establishments: vec![cafe("e1", 38.7169, -9.1393)], ..Default::default() };
        let track = vec![Coordinates::new(38.7300, -9.1393); 500];
        let (engine, geofences) = engine_with(store, track);

        for _ in 0..2 {
            engine.start_background_tracking().await;
            for _ in 0..200 {
                if !geofences.active.lock().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            assert_eq!(engine.registered_geofences().await, vec!["establishment:e1".to_string()]);
            engine.stop_background_tracking().await;
            assert!(geofences.active.lock().is_empty());
        }
    }

    #[tokio::test]
    async fn test_concurrent_start_and_stop_end_consistent() {
        let store = FakeStore { establishments: vec![cafe("e1", 38.7169, -9.1393)], ..Default::default() };
        let track = vec![Coordinates::new(38.7300, -9.1393); 500];
        let (engine, geofences) = engine_with(store, track);

        for _ in 0..10 {
            tokio::join!(
                engine.start_background_tracking(),
                engine.stop_background_tracking(),
                engine.start_background_tracking(),
            );
        }
        engine.stop_background_tracking().await;
        // Nothing may register after the final stop
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(engine.tracking_state(), RunnerState::Stopped);
        assert!(engine.registered_geofences().await.is_empty());
        assert!(geofences.active.lock().is_empty());
    }
}
