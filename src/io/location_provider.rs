//! Push-based location provider interface
//!
//! Providers deliver batches of fixes to a callback until unsubscribed.
//! `PositionStream` turns that into a pull-based sequence.

use crate::domain::types::PositionFix;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Receives every batch of fixes a provider produces, oldest first
pub type FixCallback = Box<dyn Fn(Vec<PositionFix>) + Send + Sync>;

/// Opaque handle returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Which location sources are currently enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProviderStatus {
    pub gps: bool,
    pub network: bool,
}

impl ProviderStatus {
    pub fn any_enabled(&self) -> bool {
        self.gps || self.network
    }
}

/// Why a position stream cannot deliver fixes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationUnavailable {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("no location provider enabled")]
    ProvidersDisabled,
    #[error("provider rejected subscription: {0}")]
    SubscriptionFailed(String),
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    fn permission_granted(&self) -> bool;

    async fn provider_status(&self) -> ProviderStatus;

    /// Start delivering fixes to `callback` roughly every `interval`
    fn subscribe(
        &self,
        interval: Duration,
        callback: FixCallback,
    ) -> Result<SubscriptionHandle, LocationUnavailable>;

    /// Stop a subscription. Returns once no new callback invocation can start.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// Bookkeeping for providers that run one task per subscription
#[derive(Default)]
pub struct Subscriptions {
    next_id: AtomicU64,
    active: Mutex<FxHashMap<u64, CancellationToken>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a handle and the token its task must watch
    pub fn open(&self) -> (SubscriptionHandle, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.active.lock().insert(id, token.clone());
        (SubscriptionHandle(id), token)
    }

    /// Cancel a subscription's task; unknown handles are ignored
    pub fn close(&self, handle: SubscriptionHandle) -> bool {
        match self.active.lock().remove(&handle.0) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

/// Spawn a subscription task on the current runtime
pub(crate) fn spawn_on_current<F>(future: F) -> Result<(), LocationUnavailable>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| LocationUnavailable::SubscriptionFailed(e.to_string()))?;
    handle.spawn(future);
    Ok(())
}
