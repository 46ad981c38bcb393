//! Replays a recorded track as a location provider
//!
//! Track files are JSONL, one point per line:
//! `{"latitude": 38.7169, "longitude": -9.1393}`
//! Blank lines and lines starting with `#` are skipped. Each subscription
//! walks the track from the start, one single-fix batch per interval, and
//! goes quiet at the end of the track. Fixes are stamped at emission time.

use crate::domain::types::{Coordinates, PositionFix};
use crate::io::location_provider::{
    spawn_on_current, FixCallback, LocationProvider, LocationUnavailable, ProviderStatus,
    Subscriptions, SubscriptionHandle,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

pub struct ReplayProvider {
    points: Arc<Vec<Coordinates>>,
    permission_granted: bool,
    subscriptions: Subscriptions,
}

impl ReplayProvider {
    pub fn from_points(points: Vec<Coordinates>) -> Self {
        Self { points: Arc::new(points), permission_granted: true, subscriptions: Subscriptions::new() }
    }

    /// Load a JSONL track file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read track file {}", path.display()))?;

        let mut points = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let point: Coordinates = serde_json::from_str(line).with_context(|| {
                format!("Invalid track point at {}:{}", path.display(), line_no + 1)
            })?;
            points.push(point);
        }

        info!(file = %path.display(), points = points.len(), "replay_track_loaded");
        Ok(Self::from_points(points))
    }

    pub fn with_permission(mut self, granted: bool) -> Self {
        self.permission_granted = granted;
        self
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.active_count()
    }
}

#[async_trait]
impl LocationProvider for ReplayProvider {
    fn permission_granted(&self) -> bool {
        self.permission_granted
    }

    async fn provider_status(&self) -> ProviderStatus {
        ProviderStatus { gps: !self.points.is_empty(), network: false }
    }

    fn subscribe(
        &self,
        period: Duration,
        callback: FixCallback,
    ) -> Result<SubscriptionHandle, LocationUnavailable> {
        let (handle, token) = self.subscriptions.open();
        let points = self.points.clone();

        let task = async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            for point in points.iter() {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {
                        if token.is_cancelled() {
                            return;
                        }
                        callback(vec![PositionFix::new(point.latitude, point.longitude, Utc::now())]);
                    }
                }
            }
            debug!(subscription = handle.0, "replay_track_finished");
        };

        if let Err(e) = spawn_on_current(task) {
            self.subscriptions.close(handle);
            return Err(e);
        }
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscriptions.close(handle);
    }
}
