//! Shared types for the proximity engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped latitude/longitude sample from a location provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64, captured_at: DateTime<Utc>) -> Self {
        Self { latitude, longitude, captured_at }
    }

    /// Fix captured now
    pub fn now(latitude: f64, longitude: f64) -> Self {
        Self::new(latitude, longitude, Utc::now())
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// A bare point on the globe (establishment position, default anchor)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Establishment as seen by the ranking pass
///
/// Sourced from the document store and treated as immutable for the
/// duration of one ranking pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstablishmentCandidate {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl EstablishmentCandidate {
    pub fn new(id: impl Into<String>, name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self { id: id.into(), name: name.into(), latitude, longitude }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// Candidate paired with its distance from the ranking origin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub candidate: EstablishmentCandidate,
    pub distance_meters: f64,
}

/// Input to a single review eligibility decision
#[derive(Debug, Clone)]
pub struct ReviewAttempt {
    pub establishment_id: String,
    pub user_id: String,
    pub user_position: PositionFix,
    /// Timestamp of this user's most recent review of the establishment
    pub prior_review_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_coordinates() {
        let fix = PositionFix::now(38.7169, -9.1393);
        assert_eq!(fix.coordinates(), Coordinates::new(38.7169, -9.1393));
    }

    #[test]
    fn test_fix_serializes_with_rfc3339_timestamp() {
        let at = DateTime::parse_from_rfc3339("2026-10-16T18:00:00Z").unwrap().with_timezone(&Utc);
        let fix = PositionFix::new(1.5, -2.5, at);
        let json = serde_json::to_value(fix).unwrap();
        assert_eq!(json["latitude"], 1.5);
        assert_eq!(json["captured_at"], "2026-10-16T18:00:00Z");
    }

    #[test]
    fn test_coordinates_display() {
        assert_eq!(Coordinates::new(38.7223, -9.1393).to_string(), "(38.722300, -9.139300)");
    }
}
