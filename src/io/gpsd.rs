//! gpsd location provider
//!
//! Protocol (gpsd JSON, TCP, default port 2947):
//! - Client sends `?WATCH={"enable":true,"json":true};`
//! - Daemon streams one JSON object per line; `class == "TPV"` objects carry
//!   position reports, `mode >= 2` means a 2D/3D fix
//!
//! TPV reports are buffered and handed to the callback as one batch per
//! interval. gpsd has no network-based provider, so `network` is always off.

use crate::domain::types::PositionFix;
use crate::io::location_provider::{
    spawn_on_current, FixCallback, LocationProvider, LocationUnavailable, ProviderStatus,
    Subscriptions, SubscriptionHandle,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Cap on buffered reports between two deliveries
const MAX_PENDING: usize = 64;

/// Subset of a gpsd TPV report
#[derive(Debug, Deserialize)]
struct GpsdReport {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    time: Option<DateTime<Utc>>,
}

/// Parse one gpsd line; `None` for non-TPV objects and fixes without position
fn parse_tpv(line: &str) -> Option<PositionFix> {
    let report: GpsdReport = serde_json::from_str(line).ok()?;
    if report.class != "TPV" || report.mode < 2 {
        return None;
    }
    let (lat, lon) = (report.lat?, report.lon?);
    Some(PositionFix::new(lat, lon, report.time.unwrap_or_else(Utc::now)))
}

pub struct GpsdProvider {
    addr: String,
    permission_granted: bool,
    subscriptions: Subscriptions,
}

impl GpsdProvider {
    pub fn new(addr: &str, permission_granted: bool) -> Self {
        Self { addr: addr.to_string(), permission_granted, subscriptions: Subscriptions::new() }
    }
}

#[async_trait]
impl LocationProvider for GpsdProvider {
    fn permission_granted(&self) -> bool {
        self.permission_granted
    }

    async fn provider_status(&self) -> ProviderStatus {
        let gps = matches!(timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr)).await, Ok(Ok(_)));
        if !gps {
            debug!(addr = %self.addr, "gpsd_unreachable");
        }
        ProviderStatus { gps, network: false }
    }

    fn subscribe(
        &self,
        period: Duration,
        callback: FixCallback,
    ) -> Result<SubscriptionHandle, LocationUnavailable> {
        let (handle, token) = self.subscriptions.open();
        let addr = self.addr.clone();

        if let Err(e) = spawn_on_current(watch_loop(addr, period, callback, token)) {
            self.subscriptions.close(handle);
            return Err(e);
        }
        info!(addr = %self.addr, subscription = handle.0, "gpsd_subscribed");
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        if self.subscriptions.close(handle) {
            info!(subscription = handle.0, "gpsd_unsubscribed");
        }
    }
}

/// Connect, watch, and reconnect until cancelled
async fn watch_loop(addr: String, period: Duration, callback: FixCallback, token: CancellationToken) {
    loop {
        match watch_once(&addr, period, &callback, &token).await {
            Ok(()) => return,
            Err(e) => warn!(addr = %addr, error = %e, "gpsd_connection_lost"),
        }
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

/// Returns Ok only when cancelled
async fn watch_once(
    addr: &str,
    period: Duration,
    callback: &FixCallback,
    token: &CancellationToken,
) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(WATCH_COMMAND).await?;
    let mut lines = BufReader::new(stream).lines();

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending: Vec<PositionFix> = Vec::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if let Some(fix) = parse_tpv(&line) {
                            if pending.len() == MAX_PENDING {
                                pending.remove(0);
                            }
                            pending.push(fix);
                        }
                    }
                    None => {
                        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "gpsd closed"));
                    }
                }
            }
            _ = ticker.tick() => {
                if !pending.is_empty() && !token.is_cancelled() {
                    callback(std::mem::take(&mut pending));
                }
            }
        }
    }
}
