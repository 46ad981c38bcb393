//! User-visible surfaces: one-shot notifications and the tracking indicator
//!
//! Notifications are fire-and-forget. `JsonlNotifier` writes one JSON object
//! per line to the file specified in config, for headless deployments where
//! another process renders them.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Notification surface; no acknowledgement
pub trait Notifier: Send + Sync {
    fn show(&self, title: &str, body: &str);
}

/// Persistent "tracking active" indicator shown while background tracking runs
pub trait TrackingIndicator: Send + Sync {
    fn show(&self, title: &str);
    fn set_text(&self, text: &str);
    fn has_text(&self) -> bool;
    fn remove(&self);
}

/// Notifier that only logs
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show(&self, title: &str, body: &str) {
        info!(title = %title, body = %body, "notification_shown");
    }
}

#[derive(Debug, Serialize)]
struct NotificationRecord<'a> {
    id: String,
    title: &'a str,
    body: &'a str,
    shown_at: String,
}

/// Appends notifications to a JSONL file
pub struct JsonlNotifier {
    file_path: PathBuf,
}

impl JsonlNotifier {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        info!(file_path = %file_path.display(), "notification_sink_initialized");
        Self { file_path }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path.display(), bytes = %line.len(), "notification_written");
        Ok(())
    }
}

impl Notifier for JsonlNotifier {
    fn show(&self, title: &str, body: &str) {
        let record = NotificationRecord {
            id: Uuid::now_v7().to_string(),
            title,
            body,
            shown_at: Utc::now().to_rfc3339(),
        };
        let result = serde_json::to_string(&record)
            .map_err(std::io::Error::other)
            .and_then(|line| self.append_line(&line));
        match result {
            Ok(()) => info!(id = %record.id, title = %title, "notification_shown"),
            Err(e) => error!(id = %record.id, error = %e, "notification_write_failed"),
        }
    }
}

#[derive(Debug, Default)]
struct IndicatorState {
    title: String,
    text: Option<String>,
}

/// Indicator that logs its lifecycle
#[derive(Debug, Default)]
pub struct LogIndicator {
    state: Mutex<Option<IndicatorState>>,
}

impl LogIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_visible(&self) -> bool {
        self.state.lock().is_some()
    }

    pub fn text(&self) -> Option<String> {
        self.state.lock().as_ref().and_then(|s| s.text.clone())
    }
}

impl TrackingIndicator for LogIndicator {
    fn show(&self, title: &str) {
        *self.state.lock() = Some(IndicatorState { title: title.to_string(), text: None });
        info!(title = %title, "tracking_indicator_shown");
    }

    fn set_text(&self, text: &str) {
        let mut state = self.state.lock();
        if let Some(s) = state.as_mut() {
            s.text = Some(text.to_string());
            info!(title = %s.title, text = %text, "tracking_indicator_updated");
        }
    }

    fn has_text(&self) -> bool {
        self.state.lock().as_ref().is_some_and(|s| s.text.is_some())
    }

    fn remove(&self) {
        if self.state.lock().take().is_some() {
            info!("tracking_indicator_removed");
        }
    }
}
