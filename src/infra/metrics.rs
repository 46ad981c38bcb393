//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics so recording from the runner, refresher and event handler
//! never contends on a lock.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only; do NOT use them for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Lock-free metrics collector
pub struct Metrics {
    /// Position fixes written to location state (monotonic)
    fixes_received: AtomicU64,
    /// Fixes dropped because the consumer was behind
    fixes_dropped: AtomicU64,
    /// Fixes received since last report (reset on report)
    fixes_since_report: AtomicU64,
    geofence_syncs: AtomicU64,
    geofences_registered: AtomicU64,
    geofences_unregistered: AtomicU64,
    /// Individual watch (un)registration failures
    geofence_failures: AtomicU64,
    proximity_events: AtomicU64,
    notifications_dispatched: AtomicU64,
    /// Events dropped by the time-of-day window
    notifications_suppressed: AtomicU64,
    review_checks_allowed: AtomicU64,
    review_checks_denied: AtomicU64,
    remote_fetch_failures: AtomicU64,
    last_report: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            fixes_received: AtomicU64::new(0),
            fixes_dropped: AtomicU64::new(0),
            fixes_since_report: AtomicU64::new(0),
            geofence_syncs: AtomicU64::new(0),
            geofences_registered: AtomicU64::new(0),
            geofences_unregistered: AtomicU64::new(0),
            geofence_failures: AtomicU64::new(0),
            proximity_events: AtomicU64::new(0),
            notifications_dispatched: AtomicU64::new(0),
            notifications_suppressed: AtomicU64::new(0),
            review_checks_allowed: AtomicU64::new(0),
            review_checks_denied: AtomicU64::new(0),
            remote_fetch_failures: AtomicU64::new(0),
            last_report: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_fix(&self) {
        self.fixes_received.fetch_add(1, Ordering::Relaxed);
        self.fixes_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fix_dropped(&self) {
        self.fixes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_geofence_sync(&self, registered: u64, unregistered: u64, failures: u64) {
        self.geofence_syncs.fetch_add(1, Ordering::Relaxed);
        self.geofences_registered.fetch_add(registered, Ordering::Relaxed);
        self.geofences_unregistered.fetch_add(unregistered, Ordering::Relaxed);
        self.geofence_failures.fetch_add(failures, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_proximity_event(&self) {
        self.proximity_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification(&self) {
        self.notifications_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_suppressed(&self) {
        self.notifications_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_review_check(&self, allowed: bool) {
        if allowed {
            self.review_checks_allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.review_checks_denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_remote_fetch_failure(&self) {
        self.remote_fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fixes_received(&self) -> u64 {
        self.fixes_received.load(Ordering::Relaxed)
    }

    pub fn notifications_dispatched(&self) -> u64 {
        self.notifications_dispatched.load(Ordering::Relaxed)
    }

    pub fn geofence_failures(&self) -> u64 {
        self.geofence_failures.load(Ordering::Relaxed)
    }

    pub fn remote_fetch_failures(&self) -> u64 {
        self.remote_fetch_failures.load(Ordering::Relaxed)
    }

    /// Snapshot all counters; resets the per-report fix counter
    pub fn report(&self, registered_watches: usize) -> MetricsSummary {
        let elapsed = {
            let mut last = self.last_report.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };
        let fixes_window = self.fixes_since_report.swap(0, Ordering::Relaxed);
        let secs = elapsed.as_secs_f64();
        let fixes_per_min = if secs > 0.0 { fixes_window as f64 * 60.0 / secs } else { 0.0 };

        MetricsSummary {
            fixes_total: self.fixes_received.load(Ordering::Relaxed),
            fixes_per_min,
            fixes_dropped: self.fixes_dropped.load(Ordering::Relaxed),
            geofence_syncs: self.geofence_syncs.load(Ordering::Relaxed),
            geofences_registered: self.geofences_registered.load(Ordering::Relaxed),
            geofences_unregistered: self.geofences_unregistered.load(Ordering::Relaxed),
            geofence_failures: self.geofence_failures.load(Ordering::Relaxed),
            registered_watches,
            proximity_events: self.proximity_events.load(Ordering::Relaxed),
            notifications_dispatched: self.notifications_dispatched.load(Ordering::Relaxed),
            notifications_suppressed: self.notifications_suppressed.load(Ordering::Relaxed),
            review_checks_allowed: self.review_checks_allowed.load(Ordering::Relaxed),
            review_checks_denied: self.review_checks_denied.load(Ordering::Relaxed),
            remote_fetch_failures: self.remote_fetch_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of all counters
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub fixes_total: u64,
    pub fixes_per_min: f64,
    pub fixes_dropped: u64,
    pub geofence_syncs: u64,
    pub geofences_registered: u64,
    pub geofences_unregistered: u64,
    pub geofence_failures: u64,
    pub registered_watches: usize,
    pub proximity_events: u64,
    pub notifications_dispatched: u64,
    pub notifications_suppressed: u64,
    pub review_checks_allowed: u64,
    pub review_checks_denied: u64,
    pub remote_fetch_failures: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            fixes_total = %self.fixes_total,
            fixes_per_min = format!("{:.1}", self.fixes_per_min),
            fixes_dropped = %self.fixes_dropped,
            geofence_syncs = %self.geofence_syncs,
            registered_watches = %self.registered_watches,
            geofence_failures = %self.geofence_failures,
            proximity_events = %self.proximity_events,
            notifications = %self.notifications_dispatched,
            notifications_suppressed = %self.notifications_suppressed,
            reviews_allowed = %self.review_checks_allowed,
            reviews_denied = %self.review_checks_denied,
            remote_fetch_failures = %self.remote_fetch_failures,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.fixes_received(), 0);
        assert_eq!(metrics.notifications_dispatched(), 0);
    }

    #[test]
    fn test_report_resets_window_only() {
        let metrics = Metrics::new();
        metrics.record_fix();
        metrics.record_fix();

        let first = metrics.report(0);
        assert_eq!(first.fixes_total, 2);

        metrics.record_fix();
        let second = metrics.report(0);
        assert_eq!(second.fixes_total, 3);
        assert_eq!(metrics.fixes_since_report.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_geofence_sync_counters() {
        let metrics = Metrics::new();
        metrics.record_geofence_sync(3, 1, 2);
        metrics.record_geofence_sync(1, 0, 0);

        let summary = metrics.report(4);
        assert_eq!(summary.geofence_syncs, 2);
        assert_eq!(summary.geofences_registered, 4);
        assert_eq!(summary.geofences_unregistered, 1);
        assert_eq!(summary.geofence_failures, 2);
        assert_eq!(summary.registered_watches, 4);
    }

    #[test]
    fn test_review_checks() {
        let metrics = Metrics::new();
        metrics.record_review_check(true);
        metrics.record_review_check(false);
        metrics.record_review_check(false);

        let summary = metrics.report(0);
        assert_eq!(summary.review_checks_allowed, 1);
        assert_eq!(summary.review_checks_denied, 2);
    }
}
