use std::collections::BTreeMap;

use anyhow::Result;
use geojson::{Feature, FeatureCollection, GeoJson};
use serde::Serialize;

use tracking::{EntityID, LatLng, Report, Target};

/// One output row per input report
#[derive(Serialize)]
pub struct Row {
    vehicle: String,
    timestamp_ms: Option<i64>,
    raw_lat: f64,
    raw_lng: f64,
    filtered_lat: f64,
    filtered_lng: f64,
    target_lat: f64,
    target_lng: f64,
    extrapolated: bool,
    elapsed_seconds: f64,
    duration_ms: i64,
    // Where the marker was drawn when this report arrived, if it had appeared yet
    drawn_lat: Option<f64>,
    drawn_lng: Option<f64>,
    // Did this report cut short an animation still in flight?
    superseded: bool,
}

impl Row {
    pub fn new(report: &Report, target: &Target, drawn: Option<LatLng>, superseded: bool) -> Self {
        Self {
            vehicle: report.entity.0.clone(),
            timestamp_ms: report.timestamp_ms,
            raw_lat: report.position.lat,
            raw_lng: report.position.lng,
            filtered_lat: target.filtered.lat,
            filtered_lng: target.filtered.lng,
            target_lat: target.position.lat,
            target_lng: target.position.lng,
            extrapolated: target.extrapolated,
            elapsed_seconds: target.elapsed.inner_seconds(),
            duration_ms: (target.duration.inner_seconds() * 1000.0).round() as i64,
            drawn_lat: drawn.map(|pt| pt.lat),
            drawn_lng: drawn.map(|pt| pt.lng),
            superseded,
        }
    }
}

pub fn write_csv<W: std::io::Write>(rows: &[Row], writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// The raw and smoothed path of every vehicle, for eyeballing the filter in a map viewer.
pub struct Tracks {
    per_vehicle: BTreeMap<EntityID, Track>,
}

#[derive(Default)]
struct Track {
    raw: Vec<LatLng>,
    filtered: Vec<LatLng>,
    targets: Vec<LatLng>,
}

impl Tracks {
    pub fn new() -> Self {
        Self {
            per_vehicle: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, report: &Report, target: &Target) {
        let track = self
            .per_vehicle
            .entry(report.entity.clone())
            .or_insert_with(Track::default);
        track.raw.push(report.position);
        track.filtered.push(target.filtered);
        track.targets.push(target.position);
    }

    pub fn to_geojson(&self) -> GeoJson {
        let mut features = Vec::new();
        for (id, track) in &self.per_vehicle {
            for (kind, pts) in [
                ("raw", &track.raw),
                ("filtered", &track.filtered),
                ("target", &track.targets),
            ] {
                // A LineString needs at least 2 points
                if pts.len() < 2 {
                    continue;
                }
                let mut feature = Feature {
                    bbox: None,
                    geometry: Some(geojson::Geometry::new(geojson::Value::LineString(
                        pts.iter().map(|pt| vec![pt.lng, pt.lat]).collect(),
                    ))),
                    id: None,
                    properties: None,
                    foreign_members: None,
                };
                feature.set_property("vehicle", id.0.clone());
                feature.set_property("kind", kind);
                feature.set_property("points", pts.len());
                features.push(feature);
            }
        }

        GeoJson::FeatureCollection(FeatureCollection {
            features,
            bbox: None,
            foreign_members: None,
        })
    }

    pub fn write_geojson(&self, path: &str) -> Result<()> {
        fs_err::write(path, serde_json::to_string_pretty(&self.to_geojson())?)?;
        Ok(())
    }
}
