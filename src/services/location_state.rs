//! Current position holder
//!
//! Single source of truth for "where is the device now". Holds only the
//! latest fix; each `replace` publishes atomically, so readers see either the
//! old fix or the new one, never a mix. Last write wins by delivery order.

use crate::domain::types::PositionFix;
use tokio::sync::watch;
use tracing::trace;

pub struct LocationState {
    current: watch::Sender<Option<PositionFix>>,
}

impl LocationState {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    pub fn current(&self) -> Option<PositionFix> {
        *self.current.borrow()
    }

    pub fn replace(&self, fix: PositionFix) {
        trace!(lat = fix.latitude, lon = fix.longitude, "location_state_replaced");
        self.current.send_replace(Some(fix));
    }

    /// Receiver notified on every replace; starts at the current value
    pub fn subscribe(&self) -> watch::Receiver<Option<PositionFix>> {
        self.current.subscribe()
    }
}

impl Default for LocationState {
    fn default() -> Self {
        Self::new()
    }
}
