//! Domain models - core types and geometry
//!
//! This module contains the canonical data types used throughout the engine:
//! - `PositionFix` - one timestamped sample from a location provider
//! - `EstablishmentCandidate` / `RankedCandidate` - ranking input and output
//! - `GeofenceWatch` / `ProximityEvent` - region watches and their events
//! - `geo` - haversine distance

pub mod geo;
pub mod geofence;
pub mod types;

pub use geofence::{GeofenceWatch, ProximityEvent, Transition};
pub use types::{Coordinates, EstablishmentCandidate, PositionFix, RankedCandidate, ReviewAttempt};
