use anyhow::Result;
use geom::{Duration, Speed};
use serde::{Deserialize, Serialize};

use crate::FilterNoise;

/// Everything the tracker lets a deployment tune. These depend on GPS quality and how laggy the
/// position feed is, not on the algorithms, so none of them are hardcoded elsewhere.
///
/// Every field has a default, so a config file only needs to name what it overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    pub process_noise: f64,
    /// Expected GPS error magnitude. Large relative to process_noise.
    pub measurement_noise: f64,

    /// Assumed elapsed time between reports when timestamps don't tell us.
    #[serde(with = "seconds")]
    pub default_elapsed: Duration,
    /// Elapsed time beyond this doesn't add any more uncertainty to the filter.
    #[serde(with = "seconds")]
    pub max_process_elapsed: Duration,

    /// Only extrapolate when the report is staler than this.
    #[serde(with = "seconds")]
    pub latency_trigger: Duration,
    #[serde(with = "meters_per_second")]
    pub min_moving_speed: Speed,
    #[serde(with = "seconds")]
    pub max_horizon: Duration,

    /// Animation duration is elapsed time times this factor, when extrapolating.
    pub extrapolated_stretch: f64,
    #[serde(with = "seconds")]
    pub min_extrapolated_duration: Duration,
    #[serde(with = "seconds")]
    pub max_extrapolated_duration: Duration,
    #[serde(with = "seconds")]
    pub min_smoothed_duration: Duration,
    #[serde(with = "seconds")]
    pub max_smoothed_duration: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            process_noise: 0.01,
            measurement_noise: 20.0,

            default_elapsed: Duration::seconds(1.0),
            max_process_elapsed: Duration::seconds(10.0),

            latency_trigger: Duration::seconds(3.0),
            // 5 km/h
            min_moving_speed: Speed::meters_per_second(5.0 / 3.6),
            max_horizon: Duration::seconds(10.0),

            extrapolated_stretch: 1.2,
            min_extrapolated_duration: Duration::seconds(5.0),
            max_extrapolated_duration: Duration::seconds(15.0),
            min_smoothed_duration: Duration::seconds(0.6),
            max_smoothed_duration: Duration::seconds(10.0),
        }
    }
}

impl Tunables {
    pub fn validate(&self) -> Result<()> {
        self.filter_noise()?;
        if !(self.extrapolated_stretch.is_finite() && self.extrapolated_stretch > 0.0) {
            bail!(
                "extrapolated_stretch must be positive, not {}",
                self.extrapolated_stretch
            );
        }
        for (name, value) in [
            ("default_elapsed", self.default_elapsed),
            ("max_horizon", self.max_horizon),
            ("min_extrapolated_duration", self.min_extrapolated_duration),
            ("min_smoothed_duration", self.min_smoothed_duration),
        ] {
            if value <= Duration::ZERO {
                bail!("{name} must be positive, not {value}");
            }
        }
        if self.latency_trigger < Duration::ZERO {
            bail!("latency_trigger can't be negative");
        }
        if self.min_moving_speed < Speed::ZERO {
            bail!("min_moving_speed can't be negative");
        }
        if self.min_extrapolated_duration > self.max_extrapolated_duration {
            bail!(
                "min_extrapolated_duration {} exceeds max_extrapolated_duration {}",
                self.min_extrapolated_duration,
                self.max_extrapolated_duration
            );
        }
        if self.min_smoothed_duration > self.max_smoothed_duration {
            bail!(
                "min_smoothed_duration {} exceeds max_smoothed_duration {}",
                self.min_smoothed_duration,
                self.max_smoothed_duration
            );
        }
        Ok(())
    }

    pub fn filter_noise(&self) -> Result<FilterNoise> {
        FilterNoise::new(
            self.process_noise,
            self.measurement_noise,
            self.max_process_elapsed,
        )
    }
}

// geom stores these as scaled integers; config files should read naturally.
mod seconds {
    use geom::Duration;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(x: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(x.inner_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let x = f64::deserialize(d)?;
        if !x.is_finite() {
            return Err(D::Error::custom(format!("{x} isn't a number of seconds")));
        }
        Ok(Duration::seconds(x))
    }
}

mod meters_per_second {
    use geom::Speed;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(x: &Speed, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(x.inner_meters_per_second())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Speed, D::Error> {
        let x = f64::deserialize(d)?;
        if !x.is_finite() {
            return Err(D::Error::custom(format!("{x} isn't a speed")));
        }
        Ok(Speed::meters_per_second(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Tunables::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_noise() {
        let mut t = Tunables::default();
        t.process_noise = 0.0;
        assert!(t.validate().is_err());

        let mut t = Tunables::default();
        t.measurement_noise = f64::NAN;
        assert!(t.validate().is_err());

        let mut t = Tunables::default();
        t.measurement_noise = -20.0;
        assert!(t.validate().is_err());
        assert!(t.filter_noise().is_err());

        let mut t = Tunables::default();
        t.max_process_elapsed = Duration::ZERO;
        assert!(t.validate().is_err());
    }

    #[test]
    fn rejects_inverted_bounds() {
        let mut t = Tunables::default();
        t.min_smoothed_duration = Duration::seconds(20.0);
        assert!(t.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let t: Tunables = serde_json::from_str(r#"{"measurement_noise": 50.0}"#).unwrap();
        assert_eq!(t.measurement_noise, 50.0);
        assert_eq!(t.process_noise, Tunables::default().process_noise);
        assert_eq!(t.max_horizon, Duration::seconds(10.0));
    }

    #[test]
    fn durations_and_speeds_read_as_plain_numbers() {
        let t: Tunables =
            serde_json::from_str(r#"{"latency_trigger": 4.5, "min_moving_speed": 2.0}"#).unwrap();
        assert_eq!(t.latency_trigger, Duration::seconds(4.5));
        assert_eq!(t.min_moving_speed, Speed::meters_per_second(2.0));

        let json = serde_json::to_value(&Tunables::default()).unwrap();
        assert_eq!(json["max_horizon"], serde_json::Value::from(10.0));
        let back: Tunables = serde_json::from_value(json).unwrap();
        assert_eq!(back, Tunables::default());
    }
}
