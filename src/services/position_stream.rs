//! Pull-based sequence of position fixes over a push-based provider
//!
//! `PositionStream::positions` hands out a cold `PositionFixes` sequence:
//! nothing touches the provider until the first `next()`, which checks
//! permission and provider availability and then subscribes. Each provider
//! batch contributes only its newest fix.
//!
//! Cancellation order matters: the provider is unsubscribed first, then the
//! callback's sender slot is emptied, then the receiver is closed. A callback
//! still running on a provider thread after `unsubscribe` returns finds the
//! slot empty, so no fix can surface after `cancel()`.

use crate::domain::types::PositionFix;
use crate::infra::metrics::Metrics;
use crate::io::location_provider::{FixCallback, LocationProvider, LocationUnavailable, SubscriptionHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Fixes buffered between provider and consumer
const FIX_BUFFER: usize = 16;

type SenderSlot = Arc<Mutex<Option<mpsc::Sender<PositionFix>>>>;

/// Factory for one provider subscription
pub struct PositionStream {
    provider: Arc<dyn LocationProvider>,
    metrics: Option<Arc<Metrics>>,
}

impl PositionStream {
    pub fn new(provider: Arc<dyn LocationProvider>) -> Self {
        Self { provider, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Lazy, infinite sequence of fixes. Consumes the stream; a cancelled
    /// sequence cannot be restarted.
    pub fn positions(self, update_interval: Duration) -> PositionFixes {
        PositionFixes {
            provider: self.provider,
            metrics: self.metrics,
            interval: update_interval,
            state: StreamState::Idle,
            sender: Arc::new(Mutex::new(None)),
        }
    }
}

enum StreamState {
    Idle,
    Subscribed { handle: SubscriptionHandle, rx: mpsc::Receiver<PositionFix> },
    Finished,
}

pub struct PositionFixes {
    provider: Arc<dyn LocationProvider>,
    metrics: Option<Arc<Metrics>>,
    interval: Duration,
    state: StreamState,
    sender: SenderSlot,
}

impl PositionFixes {
    /// Next fix. `Some(Err(_))` is terminal and is followed by `None`.
    pub async fn next(&mut self) -> Option<Result<PositionFix, LocationUnavailable>> {
        if matches!(self.state, StreamState::Idle) {
            if let Err(e) = self.start().await {
                self.state = StreamState::Finished;
                return Some(Err(e));
            }
        }

        let received = match &mut self.state {
            StreamState::Subscribed { rx, .. } => rx.recv().await,
            _ => return None,
        };

        match received {
            Some(fix) => Some(Ok(fix)),
            None => {
                self.cancel();
                None
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, StreamState::Finished)
    }

    async fn start(&mut self) -> Result<(), LocationUnavailable> {
        if !self.provider.permission_granted() {
            warn!("position_stream_permission_denied");
            return Err(LocationUnavailable::PermissionDenied);
        }
        let status = self.provider.provider_status().await;
        if !status.any_enabled() {
            warn!(gps = status.gps, network = status.network, "position_stream_providers_disabled");
            return Err(LocationUnavailable::ProvidersDisabled);
        }

        let (tx, rx) = mpsc::channel(FIX_BUFFER);
        *self.sender.lock() = Some(tx);

        match self.provider.subscribe(self.interval, self.callback()) {
            Ok(handle) => {
                info!(
                    subscription = handle.0,
                    interval = ?self.interval,
                    "position_stream_subscribed"
                );
                self.state = StreamState::Subscribed { handle, rx };
                Ok(())
            }
            Err(e) => {
                self.sender.lock().take();
                warn!(error = %e, "position_stream_subscribe_failed");
                Err(e)
            }
        }
    }

    fn callback(&self) -> FixCallback {
        let slot = self.sender.clone();
        let metrics = self.metrics.clone();
        Box::new(move |batch: Vec<PositionFix>| {
            // Only the newest fix of a batch matters downstream
            let Some(fix) = batch.last().copied() else {
                return;
            };
            let guard = slot.lock();
            let Some(tx) = guard.as_ref() else {
                return;
            };
            match tx.try_send(fix) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    if let Some(m) = &metrics {
                        m.record_fix_dropped();
                    }
                    warn!("position_fix_dropped_consumer_behind");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        })
    }

    /// Unsubscribe from the provider; idempotent
    pub fn cancel(&mut self) {
        let previous = std::mem::replace(&mut self.state, StreamState::Finished);
        if let StreamState::Subscribed { handle, mut rx } = previous {
            self.provider.unsubscribe(handle);
            self.sender.lock().take();
            rx.close();
            debug!(subscription = handle.0, "position_stream_cancelled");
        }
    }
}

impl Drop for PositionFixes {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::location_provider::ProviderStatus;
    use async_trait::async_trait;
    use rustc_hash::FxHashMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    /// Provider driven by the test: batches are pushed with `emit`
    struct FakeProvider {
        permission: bool,
        status: ProviderStatus,
        /// Batches delivered from inside `subscribe`
        on_subscribe: Vec<Vec<PositionFix>>,
        /// Keep callbacks after unsubscribe to simulate late delivery
        leaky: bool,
        callbacks: Mutex<FxHashMap<u64, Arc<FixCallback>>>,
        next_id: AtomicU64,
        subscribes: AtomicUsize,
        unsubscribes: AtomicUsize,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                permission: true,
                status: ProviderStatus { gps: true, network: false },
                on_subscribe: Vec::new(),
                leaky: false,
                callbacks: Mutex::new(FxHashMap::default()),
                next_id: AtomicU64::new(0),
                subscribes: AtomicUsize::new(0),
                unsubscribes: AtomicUsize::new(0),
            }
        }

        fn emit(&self, batch: Vec<PositionFix>) {
            let callbacks: Vec<_> = self.callbacks.lock().values().cloned().collect();
            for cb in callbacks {
                cb(batch.clone());
            }
        }
    }

    #[async_trait]
    impl LocationProvider for FakeProvider {
        fn permission_granted(&self) -> bool {
            self.permission
        }

        async fn provider_status(&self) -> ProviderStatus {
            self.status
        }

        fn subscribe(
            &self,
            _interval: Duration,
            callback: FixCallback,
        ) -> Result<SubscriptionHandle, LocationUnavailable> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            for batch in &self.on_subscribe {
                callback(batch.clone());
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.callbacks.lock().insert(id, Arc::new(callback));
            Ok(SubscriptionHandle(id))
        }

        fn unsubscribe(&self, handle: SubscriptionHandle) {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
            if !self.leaky {
                self.callbacks.lock().remove(&handle.0);
            }
        }
    }

    fn fix(lat: f64) -> PositionFix {
        PositionFix::now(lat, 0.0)
    }

    #[tokio::test]
    async fn test_permission_denied_is_terminal() {
        let mut provider = FakeProvider::new();
        provider.permission = false;
        let provider = Arc::new(provider);
        let mut fixes = PositionStream::new(provider.clone()).positions(Duration::from_secs(10));

        assert_eq!(fixes.next().await, Some(Err(LocationUnavailable::PermissionDenied)));
        assert_eq!(fixes.next().await, None);
        assert_eq!(provider.subscribes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_providers_disabled_is_terminal() {
        let mut provider = FakeProvider::new();
        provider.status = ProviderStatus::default();
        let provider = Arc::new(provider);
        let mut fixes = PositionStream::new(provider.clone()).positions(Duration::from_secs(10));

        assert_eq!(fixes.next().await, Some(Err(LocationUnavailable::ProvidersDisabled)));
        assert!(fixes.is_finished());
        assert_eq!(provider.subscribes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_network_only_is_enough() {
        let mut provider = FakeProvider::new();
        provider.status = ProviderStatus { gps: false, network: true };
        provider.on_subscribe = vec![vec![fix(1.0)]];
        let mut fixes = PositionStream::new(Arc::new(provider)).positions(Duration::from_secs(10));

        assert_eq!(fixes.next().await.unwrap().unwrap().latitude, 1.0);
    }

    #[tokio::test]
    async fn test_cold_until_first_next() {
        let provider = Arc::new(FakeProvider::new());
        let fixes = PositionStream::new(provider.clone()).positions(Duration::from_secs(10));

        assert_eq!(provider.subscribes.load(Ordering::SeqCst), 0);
        drop(fixes);
        // Never subscribed, nothing to unsubscribe
        assert_eq!(provider.unsubscribes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_last_fix_of_batch_wins() {
        let mut provider = FakeProvider::new();
        provider.on_subscribe = vec![vec![fix(1.0), fix(2.0), fix(3.0)], vec![], vec![fix(4.0)]];
        let mut fixes = PositionStream::new(Arc::new(provider)).positions(Duration::from_secs(10));

        assert_eq!(fixes.next().await.unwrap().unwrap().latitude, 3.0);
        assert_eq!(fixes.next().await.unwrap().unwrap().latitude, 4.0);
    }

    #[tokio::test]
    async fn test_cancel_unsubscribes_and_blocks_late_fixes() {
        let mut provider = FakeProvider::new();
        provider.leaky = true;
        provider.on_subscribe = vec![vec![fix(1.0)]];
        let provider = Arc::new(provider);
        let mut fixes = PositionStream::new(provider.clone()).positions(Duration::from_secs(10));

        assert!(fixes.next().await.unwrap().is_ok());
        fixes.cancel();
        assert_eq!(provider.unsubscribes.load(Ordering::SeqCst), 1);

        // Provider misbehaves and delivers after unsubscribe
        provider.emit(vec![fix(9.0)]);
        assert_eq!(fixes.next().await, None);

        // Idempotent
        fixes.cancel();
        assert_eq!(provider.unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let mut provider = FakeProvider::new();
        provider.on_subscribe = vec![vec![fix(1.0)]];
        let provider = Arc::new(provider);
        {
            let mut fixes = PositionStream::new(provider.clone()).positions(Duration::from_secs(10));
            fixes.next().await.unwrap().unwrap();
        }
        assert_eq!(provider.unsubscribes.load(Ordering::SeqCst), 1);
        assert!(provider.callbacks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_instances_are_independent() {
        let mut provider = FakeProvider::new();
        provider.on_subscribe = vec![vec![fix(1.0)]];
        let provider = Arc::new(provider);

        let mut a = PositionStream::new(provider.clone()).positions(Duration::from_secs(10));
        let mut b = PositionStream::new(provider.clone()).positions(Duration::from_secs(10));
        a.next().await.unwrap().unwrap();
        b.next().await.unwrap().unwrap();

        a.cancel();
        provider.emit(vec![fix(5.0)]);

        assert_eq!(b.next().await.unwrap().unwrap().latitude, 5.0);
        assert_eq!(provider.subscribes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_and_counts() {
        let mut provider = FakeProvider::new();
        provider.on_subscribe = vec![vec![fix(0.0)]];
        let provider = Arc::new(provider);
        let metrics = Arc::new(Metrics::new());
        let mut fixes = PositionStream::new(provider.clone())
            .with_metrics(metrics.clone())
            .positions(Duration::from_secs(10));
        fixes.next().await.unwrap().unwrap();

        for i in 0..(FIX_BUFFER + 3) {
            provider.emit(vec![fix(i as f64)]);
        }

        assert_eq!(metrics.report(0).fixes_dropped, 3);
    }
}
