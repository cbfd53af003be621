use geom::{Duration, Speed};

use crate::LatLng;

/// Close enough everywhere for a few hundred meters of dead reckoning.
pub const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

// Keeps the longitude conversion finite within ~1m of the poles
const MIN_COS_LAT: f64 = 1e-5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionHint {
    pub speed: Speed,
    /// Degrees clockwise from true north. 0 is north, 90 is east.
    pub heading_degrees: f64,
}

impl MotionHint {
    /// None if either input isn't finite. Negative speeds are treated as stopped.
    pub fn new(speed_meters_per_second: f64, heading_degrees: f64) -> Option<Self> {
        if !speed_meters_per_second.is_finite() || !heading_degrees.is_finite() {
            return None;
        }
        Some(Self {
            speed: Speed::meters_per_second(speed_meters_per_second.max(0.0)),
            heading_degrees,
        })
    }
}

/// Dead-reckons `pos` forward by `horizon` at constant speed and heading, using a flat-earth
/// approximation around `pos`.
///
/// Linear projection degrades quickly, so callers should cap `horizon` (10 seconds is plenty).
/// Returns `pos` unchanged if the vehicle isn't moving or there's no time to cover.
pub fn extrapolate(pos: LatLng, hint: MotionHint, horizon: Duration) -> LatLng {
    if hint.speed <= Speed::ZERO || horizon <= Duration::ZERO || !hint.heading_degrees.is_finite()
    {
        return pos;
    }

    let meters = hint.speed.inner_meters_per_second() * horizon.inner_seconds();
    let bearing = hint.heading_degrees.to_radians();
    let north = meters * bearing.cos();
    let east = meters * bearing.sin();

    let cos_lat = pos.lat.to_radians().cos().abs().max(MIN_COS_LAT);
    let lat = pos.lat + north / METERS_PER_DEGREE_LAT;
    let lng = pos.lng + east / (METERS_PER_DEGREE_LAT * cos_lat);

    LatLng {
        lat: lat.clamp(-90.0, 90.0),
        lng: normalize_longitude(lng),
    }
}

fn normalize_longitude(lng: f64) -> f64 {
    if (-180.0..180.0).contains(&lng) {
        lng
    } else {
        (lng + 180.0).rem_euclid(360.0) - 180.0
    }
}
