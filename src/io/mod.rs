//! IO modules - external system interfaces
//!
//! This module contains everything the engine talks to outside itself:
//! - `location_provider` - push-based location provider interface
//! - `gpsd` - location provider backed by a gpsd daemon
//! - `replay` - location provider replaying a recorded JSONL track
//! - `geofence_monitor` - geofence service interface and in-process monitor
//! - `document_store` - read-only establishment/review store (HTTP/JSON)
//! - `notifier` - notifications and the tracking indicator

pub mod document_store;
pub mod geofence_monitor;
pub mod gpsd;
pub mod location_provider;
pub mod notifier;
pub mod replay;

// Re-export commonly used types
pub use document_store::{DocumentStore, HttpDocumentStore, ReviewRecord};
pub use geofence_monitor::{GeofenceService, SoftwareGeofences};
pub use gpsd::GpsdProvider;
pub use location_provider::{
    FixCallback, LocationProvider, LocationUnavailable, ProviderStatus, SubscriptionHandle,
};
pub use notifier::{JsonlNotifier, LogIndicator, LogNotifier, Notifier, TrackingIndicator};
pub use replay::ReplayProvider;
