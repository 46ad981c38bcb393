//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::types::Coordinates;
use anyhow::{ensure, Context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

const CONFIG_FILE_ENV: &str = "CONFIG_FILE";
const DEFAULT_CONFIG_FILE: &str = "config/dev.toml";

/// One year
pub const MAX_REVIEW_COOLDOWN_SECS: u64 = 365 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    /// gpsd daemon over TCP
    Gpsd,
    /// JSONL track file replayed at the update interval
    Replay,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSink {
    Log,
    Jsonl,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    #[serde(default = "default_location_source")]
    pub provider: LocationSource,
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    #[serde(default = "default_gpsd_addr")]
    pub gpsd_addr: String,
    #[serde(default = "default_replay_file")]
    pub replay_file: String,
    /// User consent for location access
    #[serde(default = "default_true")]
    pub permission_granted: bool,
}

fn default_location_source() -> LocationSource {
    LocationSource::Gpsd
}

fn default_update_interval_ms() -> u64 {
    10_000
}

fn default_gpsd_addr() -> String {
    "127.0.0.1:2947".to_string()
}

fn default_replay_file() -> String {
    "tracks/dev.jsonl".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            provider: default_location_source(),
            update_interval_ms: default_update_interval_ms(),
            gpsd_addr: default_gpsd_addr(),
            replay_file: default_replay_file(),
            permission_granted: true,
        }
    }
}

/// Point used for ranking while no fix has been received
#[derive(Debug, Clone, Deserialize)]
pub struct AnchorConfig {
    #[serde(default = "default_anchor_latitude")]
    pub latitude: f64,
    #[serde(default = "default_anchor_longitude")]
    pub longitude: f64,
}

// Lisbon city centre
fn default_anchor_latitude() -> f64 {
    38.7223
}

fn default_anchor_longitude() -> f64 {
    -9.1393
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self { latitude: default_anchor_latitude(), longitude: default_anchor_longitude() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_top_n")]
    pub default_top_n: usize,
}

fn default_top_n() -> usize {
    100
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self { default_top_n: default_top_n() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceConfig {
    #[serde(default = "default_radius_m")]
    pub radius_m: f32,
    /// Number of closest establishments kept under watch
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_candidate_refresh_secs")]
    pub candidate_refresh_secs: u64,
    /// Watch cap of the geofence service
    #[serde(default = "default_max_watches")]
    pub max_watches: usize,
}

fn default_radius_m() -> f32 {
    50.0
}

fn default_candidate_refresh_secs() -> u64 {
    300
}

fn default_max_watches() -> usize {
    100
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            radius_m: default_radius_m(),
            top_n: default_top_n(),
            candidate_refresh_secs: default_candidate_refresh_secs(),
            max_watches: default_max_watches(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_max_distance_m")]
    pub max_distance_m: f64,
}

fn default_cooldown_secs() -> u64 {
    30 * 60
}

fn default_max_distance_m() -> f64 {
    50.0
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self { cooldown_secs: default_cooldown_secs(), max_distance_m: default_max_distance_m() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// First hour (local, inclusive) notifications may be shown
    #[serde(default = "default_window_start_hour")]
    pub window_start_hour: u32,
    /// Last hour (local, inclusive) notifications may be shown
    #[serde(default = "default_window_end_hour")]
    pub window_end_hour: u32,
    /// Fixed offset for local time; system offset when unset
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
    #[serde(default = "default_notification_title")]
    pub title: String,
    #[serde(default = "default_notification_body")]
    pub body: String,
    #[serde(default = "default_notification_sink")]
    pub sink: NotificationSink,
    #[serde(default = "default_notification_file")]
    pub file: String,
}

fn default_window_start_hour() -> u32 {
    16
}

fn default_window_end_hour() -> u32 {
    19
}

fn default_notification_title() -> String {
    "Establishment nearby!".to_string()
}

fn default_notification_body() -> String {
    "You are less than 50 meters from an establishment.".to_string()
}

fn default_notification_sink() -> NotificationSink {
    NotificationSink::Log
}

fn default_notification_file() -> String {
    "notifications.jsonl".to_string()
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            window_start_hour: default_window_start_hour(),
            window_end_hour: default_window_end_hour(),
            utc_offset_minutes: None,
            title: default_notification_title(),
            body: default_notification_body(),
            sink: default_notification_sink(),
            file: default_notification_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_base_url")]
    pub base_url: String,
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_store_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_store_timeout_ms() -> u64 {
    5000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { base_url: default_store_base_url(), timeout_ms: default_store_timeout_ms(), api_key: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub anchor: AnchorConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub geofence: GeofenceConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    location_source: LocationSource,
    update_interval_ms: u64,
    gpsd_addr: String,
    replay_file: String,
    location_permission_granted: bool,
    default_anchor: Coordinates,
    default_top_n: usize,
    geofence_radius_m: f32,
    geofence_top_n: usize,
    candidate_refresh_secs: u64,
    geofence_max_watches: usize,
    review_cooldown_secs: u64,
    review_max_distance_m: f64,
    notification_window_start_hour: u32,
    notification_window_end_hour: u32,
    notification_utc_offset_minutes: Option<i32>,
    notification_title: String,
    notification_body: String,
    notification_sink: NotificationSink,
    notification_file: String,
    store_base_url: String,
    store_timeout_ms: u64,
    store_api_key: Option<String>,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            location_source: toml_config.location.provider,
            update_interval_ms: toml_config.location.update_interval_ms,
            gpsd_addr: toml_config.location.gpsd_addr,
            replay_file: toml_config.location.replay_file,
            location_permission_granted: toml_config.location.permission_granted,
            default_anchor: Coordinates::new(toml_config.anchor.latitude, toml_config.anchor.longitude),
            default_top_n: toml_config.ranking.default_top_n,
            geofence_radius_m: toml_config.geofence.radius_m,
            geofence_top_n: toml_config.geofence.top_n,
            candidate_refresh_secs: toml_config.geofence.candidate_refresh_secs,
            geofence_max_watches: toml_config.geofence.max_watches,
            review_cooldown_secs: toml_config.review.cooldown_secs,
            review_max_distance_m: toml_config.review.max_distance_m,
            notification_window_start_hour: toml_config.notification.window_start_hour,
            notification_window_end_hour: toml_config.notification.window_end_hour,
            notification_utc_offset_minutes: toml_config.notification.utc_offset_minutes,
            notification_title: toml_config.notification.title,
            notification_body: toml_config.notification.body,
            notification_sink: toml_config.notification.sink,
            notification_file: toml_config.notification.file,
            store_base_url: toml_config.store.base_url,
            store_timeout_ms: toml_config.store.timeout_ms,
            store_api_key: toml_config.store.api_key,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        let mut from_args = None;
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    from_args = Some(path.clone());
                    break;
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                from_args = Some(path.to_string());
                break;
            }
        }
        Self::config_path(from_args)
    }

    /// Path given on the command line, else CONFIG_FILE, else the default
    pub fn config_path(cli_path: Option<String>) -> String {
        choose_config_path(cli_path, env::var(CONFIG_FILE_ENV).ok())
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, source: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig =
            toml::from_str(content).with_context(|| format!("Failed to parse config {}", source))?;

        let n = &toml_config.notification;
        ensure!(
            n.window_start_hour <= 23 && n.window_end_hour <= 23,
            "notification window hours must be within 0..=23"
        );
        ensure!(
            n.window_start_hour <= n.window_end_hour,
            "notification window start ({}) is after its end ({})",
            n.window_start_hour,
            n.window_end_hour
        );
        ensure!(toml_config.location.update_interval_ms > 0, "update_interval_ms must be positive");

        let g = &toml_config.geofence;
        ensure!(
            g.radius_m.is_finite() && g.radius_m > 0.0,
            "geofence radius_m must be finite and positive, got {}",
            g.radius_m
        );
        ensure!(g.candidate_refresh_secs > 0, "candidate_refresh_secs must be positive");

        let r = &toml_config.review;
        ensure!(
            r.max_distance_m.is_finite() && r.max_distance_m > 0.0,
            "review max_distance_m must be finite and positive, got {}",
            r.max_distance_m
        );
        ensure!(
            (1..=MAX_REVIEW_COOLDOWN_SECS).contains(&r.cooldown_secs),
            "review cooldown_secs must be within 1..={}, got {}",
            MAX_REVIEW_COOLDOWN_SECS,
            r.cooldown_secs
        );

        ensure!(toml_config.store.timeout_ms > 0, "store timeout_ms must be positive");
        ensure!(toml_config.metrics.interval_secs > 0, "metrics interval_secs must be positive");

        Ok(Self::from_toml(toml_config, source.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    pub fn location_source(&self) -> LocationSource {
        self.location_source
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn gpsd_addr(&self) -> &str {
        &self.gpsd_addr
    }

    pub fn replay_file(&self) -> &str {
        &self.replay_file
    }

    pub fn location_permission_granted(&self) -> bool {
        self.location_permission_granted
    }

    pub fn default_anchor(&self) -> Coordinates {
        self.default_anchor
    }

    pub fn default_top_n(&self) -> usize {
        self.default_top_n
    }

    pub fn geofence_radius_m(&self) -> f32 {
        self.geofence_radius_m
    }

    pub fn geofence_top_n(&self) -> usize {
        self.geofence_top_n
    }

    pub fn candidate_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.candidate_refresh_secs)
    }

    pub fn geofence_max_watches(&self) -> usize {
        self.geofence_max_watches
    }

    pub fn review_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.review_cooldown_secs.min(MAX_REVIEW_COOLDOWN_SECS) as i64)
    }

    pub fn review_max_distance_m(&self) -> f64 {
        self.review_max_distance_m
    }

    /// Inclusive (start, end) local hours for notifications
    pub fn notification_window(&self) -> (u32, u32) {
        (self.notification_window_start_hour, self.notification_window_end_hour)
    }

    pub fn notification_utc_offset_minutes(&self) -> Option<i32> {
        self.notification_utc_offset_minutes
    }

    pub fn notification_title(&self) -> &str {
        &self.notification_title
    }

    pub fn notification_body(&self) -> &str {
        &self.notification_body
    }

    pub fn notification_sink(&self) -> NotificationSink {
        self.notification_sink
    }

    pub fn notification_file(&self) -> &str {
        &self.notification_file
    }

    pub fn store_base_url(&self) -> &str {
        &self.store_base_url
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn store_api_key(&self) -> Option<&str> {
        self.store_api_key.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to pin the notification time zone
    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.notification_utc_offset_minutes = Some(minutes);
        self
    }

    /// Builder method for tests to shorten the update interval
    pub fn with_update_interval_ms(mut self, ms: u64) -> Self {
        self.update_interval_ms = ms;
        self
    }
}

fn choose_config_path(cli_path: Option<String>, env_path: Option<String>) -> String {
    cli_path
        .or(env_path.filter(|p| !p.is_empty()))
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string())
}
