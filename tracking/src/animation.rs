use std::collections::BTreeMap;

use geom::Duration;

use crate::{EntityID, LatLng, Target};

/// Moves a marker from one position to another over some duration, easing in and out.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Animation {
    pub from: LatLng,
    pub to: LatLng,
    pub started_at_ms: i64,
    pub duration: Duration,
}

impl Animation {
    pub fn progress(&self, now_ms: i64) -> f64 {
        if self.duration <= Duration::ZERO {
            return 1.0;
        }
        let elapsed = now_ms.saturating_sub(self.started_at_ms) as f64 / 1000.0;
        (elapsed / self.duration.inner_seconds()).clamp(0.0, 1.0)
    }

    pub fn position_at(&self, now_ms: i64) -> LatLng {
        self.from.lerp(self.to, ease_in_out_quad(self.progress(now_ms)))
    }

    pub fn is_finished(&self, now_ms: i64) -> bool {
        self.progress(now_ms) >= 1.0
    }
}

fn ease_in_out_quad(pct: f64) -> f64 {
    if pct < 0.5 {
        2.0 * pct * pct
    } else {
        1.0 - (-2.0 * pct + 2.0).powi(2) / 2.0
    }
}

struct Marker {
    // Where the marker sits when nothing is in flight
    resting: LatLng,
    in_flight: Option<Animation>,
}

impl Marker {
    fn drawn_position(&self, now_ms: i64) -> LatLng {
        match self.in_flight {
            Some(ref anim) => anim.position_at(now_ms),
            None => self.resting,
        }
    }
}

/// The markers being drawn, at most one animation in flight per vehicle. Whoever owns the frame
/// loop calls `step` every frame.
pub struct Animations {
    markers: BTreeMap<EntityID, Marker>,
}

impl Animations {
    pub fn new() -> Self {
        Self {
            markers: BTreeMap::new(),
        }
    }

    /// Starts animating towards a new target, from wherever the marker is drawn right now. Any
    /// animation already in flight for this vehicle is abandoned, and returned. A vehicle seen for
    /// the first time just appears at the target.
    pub fn start(&mut self, id: &EntityID, target: &Target, now_ms: i64) -> Option<Animation> {
        let marker = match self.markers.get_mut(id) {
            Some(marker) => marker,
            None => {
                self.markers.insert(
                    id.clone(),
                    Marker {
                        resting: target.position,
                        in_flight: None,
                    },
                );
                return None;
            }
        };

        let from = marker.drawn_position(now_ms);
        let superseded = marker.in_flight.take();
        marker.resting = target.position;
        marker.in_flight = Some(Animation {
            from,
            to: target.position,
            started_at_ms: now_ms,
            duration: target.duration,
        });
        superseded.filter(|anim| !anim.is_finished(now_ms))
    }

    pub fn drawn_position(&self, id: &EntityID, now_ms: i64) -> Option<LatLng> {
        self.markers
            .get(id)
            .map(|marker| marker.drawn_position(now_ms))
    }

    pub fn is_animating(&self, id: &EntityID, now_ms: i64) -> bool {
        self.markers
            .get(id)
            .and_then(|marker| marker.in_flight.as_ref())
            .map(|anim| !anim.is_finished(now_ms))
            .unwrap_or(false)
    }

    /// Where every marker should be drawn this frame. Finished animations are retired.
    pub fn step(&mut self, now_ms: i64) -> Vec<(EntityID, LatLng)> {
        let mut positions = Vec::new();
        for (id, marker) in &mut self.markers {
            positions.push((id.clone(), marker.drawn_position(now_ms)));
            if marker
                .in_flight
                .map(|anim| anim.is_finished(now_ms))
                .unwrap_or(false)
            {
                marker.in_flight = None;
            }
        }
        positions
    }

    pub fn cancel(&mut self, id: &EntityID, now_ms: i64) -> Option<Animation> {
        let marker = self.markers.get_mut(id)?;
        marker.resting = marker.drawn_position(now_ms);
        marker.in_flight.take()
    }

    pub fn remove(&mut self, id: &EntityID) -> bool {
        self.markers.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

impl Default for Animations {
    fn default() -> Self {
        Self::new()
    }
}
