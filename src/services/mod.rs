//! Services - business logic and state management
//!
//! This module contains the core engine services:
//! - `position_stream` - pull-based fix sequence over a location provider
//! - `location_state` - latest fix, shared by every consumer
//! - `background_runner` - supervised tracking task feeding location state
//! - `proximity_index` - distance ranking of establishments
//! - `geofence_registrar` - diff-based geofence sync and its refresh loop
//! - `proximity_events` - notification on region entry
//! - `review_gate` - review cool-down and proximity rules
//! - `engine` - facade wiring the above together

pub mod background_runner;
pub mod engine;
pub mod geofence_registrar;
pub mod location_state;
pub mod position_stream;
pub mod proximity_events;
pub mod proximity_index;
pub mod review_gate;

// Re-export commonly used types
pub use background_runner::{BackgroundLocationRunner, RunnerState};
pub use engine::ProximityEngine;
pub use geofence_registrar::{GeofenceRefresher, GeofenceRegistrar, SyncReport};
pub use location_state::LocationState;
pub use position_stream::{PositionFixes, PositionStream};
pub use proximity_events::{Dispatch, ProximityEventHandler};
pub use review_gate::{Eligibility, ReviewEligibilityGate};
