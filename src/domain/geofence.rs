//! Geofence watches and the events they produce

use crate::domain::types::{Coordinates, EstablishmentCandidate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::time::Duration;

/// Prefix of every watch id derived from an establishment id
const WATCH_ID_PREFIX: &str = "establishment:";

/// Region transition kinds a watch can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Enter,
    Exit,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Enter => "enter",
            Transition::Exit => "exit",
        }
    }
}

/// A circular region registered with the geofence service
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceWatch {
    /// Derived from the establishment id, stable across syncs
    pub id: String,
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_meters: f32,
    pub transitions: SmallVec<[Transition; 2]>,
    /// None = never expires
    pub expiration: Option<Duration>,
    /// Fire immediately when already inside at registration time
    pub initial_trigger: bool,
}

impl GeofenceWatch {
    /// Enter-only, never-expiring watch with no initial trigger
    pub fn for_establishment(candidate: &EstablishmentCandidate, radius_meters: f32) -> Self {
        Self {
            id: watch_id(&candidate.id),
            center_lat: candidate.latitude,
            center_lon: candidate.longitude,
            radius_meters,
            transitions: smallvec![Transition::Enter],
            expiration: None,
            initial_trigger: false,
        }
    }

    pub fn center(&self) -> Coordinates {
        Coordinates::new(self.center_lat, self.center_lon)
    }

    pub fn watches(&self, transition: Transition) -> bool {
        self.transitions.contains(&transition)
    }
}

/// Deterministic watch id for an establishment
pub fn watch_id(establishment_id: &str) -> String {
    format!("{}{}", WATCH_ID_PREFIX, establishment_id)
}

/// Establishment id a watch was derived from
pub fn establishment_id(watch_id: &str) -> Option<&str> {
    watch_id.strip_prefix(WATCH_ID_PREFIX)
}

/// Region transition delivered by the geofence service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityEvent {
    pub watch_id: String,
    pub transition: Transition,
    pub timestamp: DateTime<Utc>,
}

impl ProximityEvent {
    pub fn entered(watch_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { watch_id: watch_id.into(), transition: Transition::Enter, timestamp }
    }
}
