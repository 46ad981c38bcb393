//! Integration tests for configuration loading

use proximity_engine::domain::Coordinates;
use proximity_engine::infra::{Config, LocationSource, NotificationSink};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[location]
provider = "replay"
update_interval_ms = 2000
replay_file = "tracks/baixa.jsonl"
permission_granted = false

[anchor]
latitude = 41.1496
longitude = -8.6110

[ranking]
default_top_n = 20

[geofence]
radius_m = 75.0
top_n = 40
candidate_refresh_secs = 60
max_watches = 50

[review]
cooldown_secs = 3600
max_distance_m = 30.0

[notification]
window_start_hour = 9
window_end_hour = 21
utc_offset_minutes = 60
title = "Nearby"
sink = "jsonl"
file = "out/notifications.jsonl"

[store]
base_url = "http://store.internal:9000"
timeout_ms = 1500
api_key = "secret"

[metrics]
interval_secs = 15
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.location_source(), LocationSource::Replay);
    assert_eq!(config.update_interval(), Duration::from_secs(2));
    assert_eq!(config.replay_file(), "tracks/baixa.jsonl");
    assert!(!config.location_permission_granted());
    assert_eq!(config.default_anchor(), Coordinates::new(41.1496, -8.6110));
    assert_eq!(config.default_top_n(), 20);
    assert_eq!(config.geofence_radius_m(), 75.0);
    assert_eq!(config.geofence_top_n(), 40);
    assert_eq!(config.candidate_refresh_interval(), Duration::from_secs(60));
    assert_eq!(config.geofence_max_watches(), 50);
    assert_eq!(config.review_cooldown(), chrono::Duration::hours(1));
    assert_eq!(config.review_max_distance_m(), 30.0);
    assert_eq!(config.notification_window(), (9, 21));
    assert_eq!(config.notification_utc_offset_minutes(), Some(60));
    assert_eq!(config.notification_title(), "Nearby");
    // Unset fields keep their defaults
    assert_eq!(config.notification_body(), "You are less than 50 meters from an establishment.");
    assert_eq!(config.notification_sink(), NotificationSink::Jsonl);
    assert_eq!(config.notification_file(), "out/notifications.jsonl");
    assert_eq!(config.store_base_url(), "http://store.internal:9000");
    assert_eq!(config.store_timeout(), Duration::from_millis(1500));
    assert_eq!(config.store_api_key(), Some("secret"));
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/proximity.toml");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.geofence_top_n(), 100);
    assert_eq!(config.notification_window(), (16, 19));
}

#[test]
fn test_invalid_file_falls_back_to_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[notification]\nwindow_start_hour = 22\nwindow_end_hour = 6\n").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert_eq!(config.notification_window(), (16, 19));
}

#[test]
fn test_unknown_provider_rejected() {
    let err = Config::from_toml_str("[location]\nprovider = \"bluetooth\"\n", "inline").unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config inline"));
}

#[test]
fn test_zero_intervals_fall_back_to_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[geofence]\ncandidate_refresh_secs = 0\n\n[metrics]\ninterval_secs = 0\n").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert_eq!(config.config_file(), "default");
    assert!(!config.candidate_refresh_interval().is_zero());
    assert!(config.metrics_interval_secs() > 0);
}
