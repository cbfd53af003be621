use anyhow::Result;
use chrono::NaiveDateTime;
use serde::Deserialize;

use tracking::{EntityID, LatLng, Report};

/// Reads AVL reports, keeping file order. That's assumed to be the order they arrived in. Rows
/// that don't parse are logged and skipped.
pub fn load<R: std::io::Read>(reader: R) -> Result<Vec<Report>> {
    let mut reports = Vec::new();
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    for (idx, rec) in rdr.deserialize::<AVL>().enumerate() {
        match rec.map_err(anyhow::Error::from).and_then(parse) {
            Ok(report) => reports.push(report),
            Err(err) => warn!("Skipping AVL row {}: {err}", idx + 1),
        }
    }
    if reports.is_empty() {
        bail!("No usable AVL rows");
    }
    Ok(reports)
}

fn parse(rec: AVL) -> Result<Report> {
    let timestamp_ms = match rec.datetime {
        Some(ref datetime) => Some(
            NaiveDateTime::parse_from_str(datetime, "%Y-%m-%d %H:%M:%S")
                .map_err(|err| anyhow!("bad datetime {datetime}: {err}"))?
                .timestamp_millis(),
        ),
        None => None,
    };
    Ok(Report {
        entity: EntityID(rec.vehicle),
        position: LatLng::new(rec.latitude, rec.longitude),
        timestamp_ms,
        speed_meters_per_second: rec.speed,
        heading_degrees: rec.heading,
    })
}

#[derive(Deserialize)]
struct AVL {
    vehicle: String,
    datetime: Option<String>,
    latitude: f64,
    longitude: f64,
    // Meters per second
    speed: Option<f64>,
    // Degrees clockwise from north
    heading: Option<f64>,
}
