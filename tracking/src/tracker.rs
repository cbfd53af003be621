use std::collections::BTreeMap;

use anyhow::Result;
use geom::Duration;
use serde::{Deserialize, Serialize};

use crate::{
    extrapolate, EntityID, FilterNoise, FilterState, LatLng, MotionHint, PositionFilter, Tunables,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub entity: EntityID,
    pub position: LatLng,
    /// Unix milliseconds. Without it, elapsed time since the last report is unknown.
    pub timestamp_ms: Option<i64>,
    pub speed_meters_per_second: Option<f64>,
    pub heading_degrees: Option<f64>,
}

impl Report {
    pub fn new(entity: EntityID, position: LatLng, timestamp_ms: Option<i64>) -> Self {
        Self {
            entity,
            position,
            timestamp_ms,
            speed_meters_per_second: None,
            heading_degrees: None,
        }
    }

    pub fn with_motion(mut self, speed_meters_per_second: f64, heading_degrees: f64) -> Self {
        self.speed_meters_per_second = Some(speed_meters_per_second);
        self.heading_degrees = Some(heading_degrees);
        self
    }

    fn motion_hint(&self) -> Option<MotionHint> {
        MotionHint::new(self.speed_meters_per_second?, self.heading_degrees?)
    }
}

/// Where to animate a marker after one report.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Target {
    pub filtered: LatLng,
    /// Where the marker should end up. Either `filtered` or projected ahead from it.
    pub position: LatLng,
    pub extrapolated: bool,
    pub elapsed: Duration,
    /// How long the marker should take to reach `position`
    pub duration: Duration,
}

struct TrackedEntity {
    filter: PositionFilter,
    last_timestamp_ms: Option<i64>,
}

/// Owns one position filter per tracked vehicle. Filters are created the first time a vehicle
/// reports and live until the vehicle is forgotten.
pub struct Tracker {
    tunables: Tunables,
    noise: FilterNoise,
    entities: BTreeMap<EntityID, TrackedEntity>,
}

impl Tracker {
    pub fn new(tunables: Tunables) -> Result<Self> {
        tunables.validate()?;
        let noise = tunables.filter_noise()?;
        Ok(Self {
            tunables,
            noise,
            entities: BTreeMap::new(),
        })
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    /// Smooths one report and decides where and how fast to animate. Reports for the same vehicle
    /// must be passed in arrival order.
    ///
    /// Fails only for coordinates that aren't a finite position on earth; nothing is recorded then.
    pub fn observe(&mut self, report: &Report) -> Result<Target> {
        let pos = report.position;
        if !pos.is_finite() {
            bail!("{} reported a non-finite position {:?}", report.entity, pos);
        }
        if !(-90.0..=90.0).contains(&pos.lat) || !(-180.0..=180.0).contains(&pos.lng) {
            bail!("{} reported an out-of-range position {}", report.entity, pos);
        }

        let tunables = &self.tunables;
        let noise = self.noise;
        let entity = self
            .entities
            .entry(report.entity.clone())
            .or_insert_with(|| {
                debug!("Started tracking {} at {}", report.entity, pos);
                TrackedEntity {
                    filter: PositionFilter::new(pos, noise),
                    last_timestamp_ms: None,
                }
            });

        let elapsed = elapsed_between(entity.last_timestamp_ms, report.timestamp_ms)
            .unwrap_or(tunables.default_elapsed);
        let filtered = entity.filter.update(pos, elapsed);
        // Keep the newest timestamp, so an out-of-order or missing one doesn't rewind the clock
        if let Some(t) = report.timestamp_ms {
            if entity.last_timestamp_ms.map(|prev| t > prev).unwrap_or(true) {
                entity.last_timestamp_ms = Some(t);
            }
        }

        let target = match report.motion_hint() {
            Some(hint)
                if elapsed > tunables.latency_trigger && hint.speed > tunables.min_moving_speed =>
            {
                let horizon = elapsed.min(tunables.max_horizon);
                Target {
                    filtered,
                    position: extrapolate(filtered, hint, horizon),
                    extrapolated: true,
                    elapsed,
                    duration: (elapsed * tunables.extrapolated_stretch)
                        .max(tunables.min_extrapolated_duration)
                        .min(tunables.max_extrapolated_duration),
                }
            }
            _ => Target {
                filtered,
                position: filtered,
                extrapolated: false,
                elapsed,
                duration: elapsed
                    .max(tunables.min_smoothed_duration)
                    .min(tunables.max_smoothed_duration),
            },
        };
        debug!(
            "{}: filtered {}, target {} (extrapolated: {}) over {}",
            report.entity, target.filtered, target.position, target.extrapolated, target.duration
        );
        Ok(target)
    }

    pub fn forget(&mut self, id: &EntityID) -> bool {
        self.entities.remove(id).is_some()
    }

    /// Forgets every vehicle whose newest report is older than `max_age` at `now_ms`. Vehicles that
    /// never sent a timestamp are kept.
    pub fn forget_stale(&mut self, now_ms: i64, max_age: Duration) -> Vec<EntityID> {
        let mut stale = Vec::new();
        for (id, entity) in &self.entities {
            if let Some(age) = elapsed_between(entity.last_timestamp_ms, Some(now_ms)) {
                if age > max_age {
                    stale.push(id.clone());
                }
            }
        }
        for id in &stale {
            self.entities.remove(id);
        }
        if !stale.is_empty() {
            info!("Forgot {} stale vehicles", stale.len());
        }
        stale
    }

    pub fn reset(&mut self, id: &EntityID, pos: LatLng) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) => {
                entity.filter.reset(pos);
                true
            }
            None => false,
        }
    }

    pub fn filter_state(&self, id: &EntityID) -> Option<FilterState> {
        self.entities.get(id).map(|entity| entity.filter.state())
    }

    pub fn is_tracked(&self, id: &EntityID) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// None unless both timestamps are known and time moved forwards
fn elapsed_between(prev_ms: Option<i64>, next_ms: Option<i64>) -> Option<Duration> {
    let delta = next_ms?.checked_sub(prev_ms?)?;
    if delta <= 0 {
        return None;
    }
    Some(Duration::seconds(delta as f64 / 1000.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> EntityID {
        EntityID::new("bus-42")
    }

    fn school() -> LatLng {
        LatLng::new(5.351824, -3.953979)
    }

    fn tracker() -> Tracker {
        Tracker::new(Tunables::default()).unwrap()
    }

    fn report(pos: LatLng, t: i64) -> Report {
        Report::new(bus(), pos, Some(t))
    }

    #[test]
    fn first_sighting_creates_filter() {
        let mut tracker = tracker();
        assert!(!tracker.is_tracked(&bus()));
        let target = tracker.observe(&report(school(), 0)).unwrap();
        assert!(tracker.is_tracked(&bus()));
        assert_eq!(target.filtered, school());
        assert_eq!(target.position, school());
        assert!(!target.extrapolated);
        assert_eq!(target.elapsed, Duration::seconds(1.0));
        assert_eq!(target.duration, Duration::seconds(1.0));
    }

    #[test]
    fn vehicles_are_filtered_independently() {
        let mut tracker = tracker();
        let other = EntityID::new("bus-7");
        tracker.observe(&report(school(), 0)).unwrap();
        tracker
            .observe(&Report::new(other.clone(), LatLng::new(5.0, -4.0), Some(0)))
            .unwrap();
        tracker
            .observe(&report(LatLng::new(5.3520, -3.9540), 1000))
            .unwrap();
        assert_eq!(tracker.len(), 2);
        assert_eq!(
            tracker.filter_state(&other).unwrap().position,
            LatLng::new(5.0, -4.0)
        );
    }

    #[test]
    fn no_extrapolation_within_latency_trigger() {
        let mut tracker = tracker();
        tracker.observe(&report(school(), 0)).unwrap();
        let next = LatLng::new(5.3522, -3.953979);
        let target = tracker
            .observe(&report(next, 3000).with_motion(20.0, 0.0))
            .unwrap();
        assert!(!target.extrapolated);
        assert_eq!(target.position, target.filtered);
        assert_eq!(target.duration, Duration::seconds(3.0));
    }

    #[test]
    fn no_extrapolation_when_nearly_stopped() {
        let mut tracker = tracker();
        tracker.observe(&report(school(), 0)).unwrap();
        let one_kmh = 1000.0 / 3600.0;
        let target = tracker
            .observe(&report(school(), 8000).with_motion(one_kmh, 90.0))
            .unwrap();
        assert!(!target.extrapolated);
        assert_eq!(target.position, target.filtered);
        assert_eq!(target.duration, Duration::seconds(8.0));
    }

    #[test]
    fn extrapolates_stale_moving_reports() {
        let mut tracker = tracker();
        tracker.observe(&report(school(), 0)).unwrap();
        let target = tracker
            .observe(&report(school(), 4000).with_motion(10.0, 0.0))
            .unwrap();
        assert!(target.extrapolated);
        assert_eq!(target.elapsed, Duration::seconds(4.0));
        // 40m north of the filtered position
        let moved = target.filtered.approx_dist_meters(target.position);
        assert!((moved - 40.0).abs() < 0.1);
        assert!(target.position.lat > target.filtered.lat);
        // 4s * 1.2 is under the 5s floor
        assert_eq!(target.duration, Duration::seconds(5.0));
    }

    #[test]
    fn horizon_and_duration_are_capped() {
        let mut tracker = tracker();
        tracker.observe(&report(school(), 0)).unwrap();
        let target = tracker
            .observe(&report(school(), 60_000).with_motion(10.0, 90.0))
            .unwrap();
        assert!(target.extrapolated);
        let moved = target.filtered.approx_dist_meters(target.position);
        assert!((moved - 100.0).abs() < 0.1);
        assert_eq!(target.duration, Duration::seconds(15.0));
    }

    #[test]
    fn non_finite_motion_disables_extrapolation() {
        let mut tracker = tracker();
        tracker.observe(&report(school(), 0)).unwrap();
        let target = tracker
            .observe(&report(school(), 8000).with_motion(f64::NAN, 0.0))
            .unwrap();
        assert!(!target.extrapolated);
        assert!(target.position.is_finite());

        let target = tracker
            .observe(&report(school(), 16000).with_motion(10.0, f64::INFINITY))
            .unwrap();
        assert!(!target.extrapolated);
    }

    #[test]
    fn missing_or_backwards_timestamps_use_default() {
        let mut tracker = tracker();
        tracker.observe(&report(school(), 10_000)).unwrap();
        let target = tracker
            .observe(&Report::new(bus(), school(), None).with_motion(10.0, 0.0))
            .unwrap();
        assert_eq!(target.elapsed, Duration::seconds(1.0));
        assert!(!target.extrapolated);

        let target = tracker.observe(&report(school(), 5_000)).unwrap();
        assert_eq!(target.elapsed, Duration::seconds(1.0));

        // The clock didn't rewind
        let target = tracker.observe(&report(school(), 12_000)).unwrap();
        assert_eq!(target.elapsed, Duration::seconds(2.0));
    }

    #[test]
    fn rejects_bad_coordinates() {
        let mut tracker = tracker();
        assert!(tracker
            .observe(&report(LatLng::new(f64::NAN, 0.0), 0))
            .is_err());
        assert!(tracker
            .observe(&report(LatLng::new(91.0, 0.0), 0))
            .is_err());
        assert!(tracker.is_empty());
    }

    #[test]
    fn forget_and_forget_stale() {
        let mut tracker = tracker();
        let quiet = EntityID::new("quiet");
        let untimed = EntityID::new("untimed");
        tracker.observe(&report(school(), 100_000)).unwrap();
        tracker
            .observe(&Report::new(quiet.clone(), school(), Some(0)))
            .unwrap();
        tracker
            .observe(&Report::new(untimed.clone(), school(), None))
            .unwrap();

        let stale = tracker.forget_stale(110_000, Duration::minutes(1));
        assert_eq!(stale, vec![quiet.clone()]);
        assert!(!tracker.is_tracked(&quiet));
        assert!(tracker.is_tracked(&untimed));

        assert!(tracker.forget(&bus()));
        assert!(!tracker.forget(&bus()));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn reset_snaps_filter() {
        let mut tracker = tracker();
        tracker.observe(&report(school(), 0)).unwrap();
        let elsewhere = LatLng::new(5.36, -3.97);
        assert!(tracker.reset(&bus(), elsewhere));
        assert_eq!(tracker.filter_state(&bus()).unwrap().position, elsewhere);
        assert!(!tracker.reset(&EntityID::new("nobody"), elsewhere));
    }

    #[test]
    fn smoothed_duration_is_clamped() {
        let mut tracker = tracker();
        tracker.observe(&report(school(), 0)).unwrap();
        let target = tracker.observe(&report(school(), 100)).unwrap();
        assert_eq!(target.duration, Duration::seconds(0.6));
        let target = tracker.observe(&report(school(), 60_100)).unwrap();
        assert_eq!(target.duration, Duration::seconds(10.0));
    }

    #[test]
    fn extreme_timestamps_fall_back_to_default() {
        let mut tracker = tracker();
        tracker.observe(&report(school(), i64::MIN / 2 - 10)).unwrap();
        let target = tracker
            .observe(&report(school(), i64::MAX / 2 + 10))
            .unwrap();
        assert_eq!(target.elapsed, Duration::seconds(1.0));
        assert!(target.filtered.is_finite());

        assert_eq!(elapsed_between(Some(i64::MIN), Some(i64::MAX)), None);
        assert_eq!(
            elapsed_between(Some(1_000), Some(3_500)),
            Some(Duration::seconds(2.5))
        );
    }

    #[test]
    fn rejects_invalid_tunables() {
        let mut tunables = Tunables::default();
        tunables.measurement_noise = -1.0;
        assert!(Tracker::new(tunables).is_err());
    }
}
