#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod animation;
mod config;
mod extrapolate;
mod filter;
mod tracker;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use self::animation::{Animation, Animations};
pub use self::config::Tunables;
pub use self::extrapolate::{extrapolate, MotionHint, METERS_PER_DEGREE_LAT};
pub use self::filter::{FilterNoise, FilterState, PositionFilter};
pub use self::tracker::{Report, Target, Tracker};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityID(pub String);

impl EntityID {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for EntityID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A WGS84 position in degrees. Unlike `geom::LonLat`, this keeps full `f64` precision, which the
/// filter needs for sub-meter steps.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// Linear interpolation in degree space. Fine for the short hops a marker animates over.
    pub fn lerp(self, other: LatLng, pct: f64) -> LatLng {
        LatLng {
            lat: self.lat + (other.lat - self.lat) * pct,
            lng: self.lng + (other.lng - self.lng) * pct,
        }
    }

    /// Equirectangular approximation of the distance in meters. Only meant for small separations.
    pub fn approx_dist_meters(self, other: LatLng) -> f64 {
        let mean_lat = ((self.lat + other.lat) / 2.0).to_radians();
        let dy = (other.lat - self.lat) * METERS_PER_DEGREE_LAT;
        let dx = (other.lng - self.lng) * METERS_PER_DEGREE_LAT * mean_lat.cos();
        dx.hypot(dy)
    }
}

impl fmt::Display for LatLng {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:.7}, {:.7})", self.lat, self.lng)
    }
}
