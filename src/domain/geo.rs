//! Great-circle distance on a spherical Earth
//!
//! No ellipsoid correction. The error is negligible for sub-kilometer
//! ranking and radius checks, which is all the engine uses it for.

use crate::domain::types::Coordinates;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters between two lat/lon points (degrees)
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Haversine distance in meters between two coordinates
pub fn distance_m(a: Coordinates, b: Coordinates) -> f64 {
    haversine_m(a.latitude, a.longitude, b.latitude, b.longitude)
}
