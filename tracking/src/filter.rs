use anyhow::Result;
use geom::Duration;
use serde::Serialize;

use crate::LatLng;

/// Velocity is estimated over at least this many seconds, so a burst of reports can't blow it up.
const MIN_VELOCITY_ELAPSED_SECONDS: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterNoise {
    // Uncertainty added per second of elapsed time
    process: f64,
    // Uncertainty of every raw observation
    measurement: f64,
    // Elapsed time is capped to this before scaling process noise. An entity that vanished for an
    // hour shouldn't have its next fix completely override the history.
    max_process_elapsed: Duration,
}

impl FilterNoise {
    /// Both noise values must be positive, or the gain stops being a weight in (0, 1).
    pub fn new(process: f64, measurement: f64, max_process_elapsed: Duration) -> Result<Self> {
        if !(process.is_finite() && process > 0.0) {
            bail!("process noise must be positive, not {process}");
        }
        if !(measurement.is_finite() && measurement > 0.0) {
            bail!("measurement noise must be positive, not {measurement}");
        }
        if max_process_elapsed <= Duration::ZERO {
            bail!("max_process_elapsed must be positive, not {max_process_elapsed}");
        }
        Ok(Self {
            process,
            measurement,
            max_process_elapsed,
        })
    }

    pub fn process(&self) -> f64 {
        self.process
    }

    pub fn measurement(&self) -> f64 {
        self.measurement
    }

    pub fn max_process_elapsed(&self) -> Duration {
        self.max_process_elapsed
    }
}

impl Default for FilterNoise {
    fn default() -> Self {
        Self {
            process: 0.01,
            measurement: 20.0,
            max_process_elapsed: Duration::seconds(10.0),
        }
    }
}

/// A Kalman filter over one vehicle's GPS fixes, independently per axis. The motion model holds
/// position constant and grows uncertainty with elapsed time; projecting forward with speed and
/// heading is left to `extrapolate`, which has better kinematics than the filter could estimate.
///
/// Keep one of these per vehicle for as long as the vehicle is tracked. Recreating it discards
/// the history and the first few outputs will jitter again.
#[derive(Clone, Debug)]
pub struct PositionFilter {
    lat: f64,
    lng: f64,
    // Degrees per second, just for diagnostics
    velocity_lat: f64,
    velocity_lng: f64,
    // Estimation uncertainty per axis. Always in (0, measurement + process * max_process_elapsed].
    p_lat: f64,
    p_lng: f64,
    noise: FilterNoise,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FilterState {
    pub position: LatLng,
    /// Apparent movement in degrees/second over the last update
    pub velocity: LatLng,
    pub uncertainty: f64,
}

impl PositionFilter {
    /// Seeds the estimate at the first observed position. Uncertainty starts as high as the
    /// measurement noise, so early observations are trusted about as much as the seed.
    pub fn new(initial: LatLng, noise: FilterNoise) -> Self {
        Self {
            lat: initial.lat,
            lng: initial.lng,
            velocity_lat: 0.0,
            velocity_lng: 0.0,
            p_lat: noise.measurement,
            p_lng: noise.measurement,
            noise,
        }
    }

    /// One predict-then-correct step. `elapsed` is the time since the previous observation; the
    /// caller should default it when unknown, but anything non-positive is treated as 1 second.
    ///
    /// Never fails for finite input, and the output always lies between the previous estimate and
    /// the observation.
    pub fn update(&mut self, observed: LatLng, elapsed: Duration) -> LatLng {
        let elapsed = if elapsed > Duration::ZERO {
            elapsed
        } else {
            Duration::seconds(1.0)
        };
        let process_elapsed = elapsed.min(self.noise.max_process_elapsed);

        // Predict
        let growth = self.noise.process * process_elapsed.inner_seconds();
        self.p_lat += growth;
        self.p_lng += growth;

        // Correct
        let (lat, p_lat) = correct(self.lat, self.p_lat, observed.lat, self.noise.measurement);
        let (lng, p_lng) = correct(self.lng, self.p_lng, observed.lng, self.noise.measurement);

        let velocity_elapsed = elapsed.inner_seconds().max(MIN_VELOCITY_ELAPSED_SECONDS);
        self.velocity_lat = (lat - self.lat) / velocity_elapsed;
        self.velocity_lng = (lng - self.lng) / velocity_elapsed;

        self.lat = lat;
        self.lng = lng;
        self.p_lat = p_lat;
        self.p_lng = p_lng;

        self.position()
    }

    /// Forgets velocity but not uncertainty.
    pub fn reset(&mut self, pos: LatLng) {
        self.lat = pos.lat;
        self.lng = pos.lng;
        self.velocity_lat = 0.0;
        self.velocity_lng = 0.0;
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    pub fn state(&self) -> FilterState {
        FilterState {
            position: self.position(),
            velocity: LatLng::new(self.velocity_lat, self.velocity_lng),
            uncertainty: self.p_lat.hypot(self.p_lng),
        }
    }
}

// Returns the corrected estimate and uncertainty
fn correct(estimate: f64, uncertainty: f64, observed: f64, measurement_noise: f64) -> (f64, f64) {
    let gain = uncertainty / (uncertainty + measurement_noise);
    (
        estimate + gain * (observed - estimate),
        (1.0 - gain) * uncertainty,
    )
}
