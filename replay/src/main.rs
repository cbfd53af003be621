#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod avl;
mod export;

use abstutil::{prettyprint_usize, Timer};
use anyhow::Result;
use geom::Duration;
use structopt::StructOpt;

use tracking::{Animations, Report, Tracker, Tunables};

use self::export::{Row, Tracks};

/// Replays recorded vehicle positions through the smoothing and extrapolation a live map would
/// use, to see what the markers would have done.
#[derive(StructOpt)]
struct Args {
    /// The path to a CSV file with columns vehicle,datetime,latitude,longitude,speed,heading
    #[structopt(long)]
    avl: String,
    /// The path to a JSON file overriding some tracking parameters
    #[structopt(long)]
    config: Option<String>,
    /// Write one CSV row per report here. Defaults to stdout.
    #[structopt(long)]
    output: Option<String>,
    /// Also write the raw, filtered, and target tracks per vehicle as GeoJSON
    #[structopt(long)]
    geojson: Option<String>,
    /// Stop tracking a vehicle after this many seconds without a report
    #[structopt(long, default_value = "600")]
    forget_after: f64,
}

impl Args {
    fn tunables(&self, timer: &mut Timer) -> Result<Tunables> {
        match self.config {
            Some(ref path) => abstio::maybe_read_json::<Tunables>(path.clone(), timer),
            None => Ok(Tunables::default()),
        }
    }
}

fn main() -> Result<()> {
    abstutil::logger::setup();

    let args = Args::from_iter(abstutil::cli_args());
    if !(args.forget_after.is_finite() && args.forget_after > 0.0) {
        bail!("--forget-after must be a positive number of seconds");
    }
    let mut timer = Timer::new("replay AVL");

    let tunables = args.tunables(&mut timer)?;
    timer.start(format!("load {}", args.avl));
    let reports = avl::load(fs_err::File::open(&args.avl)?)?;
    timer.stop(format!("load {}", args.avl));

    let replay = Replay::run(
        &reports,
        tunables,
        Duration::seconds(args.forget_after),
        &mut timer,
    )?;
    info!(
        "{} reports, {} skipped, {} extrapolated, {} animations cut short",
        prettyprint_usize(reports.len()),
        prettyprint_usize(replay.skipped),
        prettyprint_usize(replay.extrapolated),
        prettyprint_usize(replay.superseded)
    );

    match args.output {
        Some(ref path) => export::write_csv(&replay.rows, fs_err::File::create(path)?)?,
        None => export::write_csv(&replay.rows, std::io::stdout().lock())?,
    }
    if let Some(ref path) = args.geojson {
        replay.tracks.write_geojson(path)?;
        info!("Wrote {path}");
    }
    Ok(())
}

struct Replay {
    rows: Vec<Row>,
    tracks: Tracks,
    skipped: usize,
    extrapolated: usize,
    superseded: usize,
}

// How often to look for vehicles that went quiet, in replay time
const SWEEP_EVERY_MS: i64 = 60_000;

impl Replay {
    /// Feeds every report through one tracker in order. The markers' clock is the report
    /// timestamps; a report without one happens at the latest time seen so far.
    fn run(
        reports: &[Report],
        tunables: Tunables,
        forget_after: Duration,
        timer: &mut Timer,
    ) -> Result<Self> {
        let mut tracker = Tracker::new(tunables)?;
        let mut animations = Animations::new();
        let mut replay = Replay {
            rows: Vec::new(),
            tracks: Tracks::new(),
            skipped: 0,
            extrapolated: 0,
            superseded: 0,
        };

        let mut clock_ms: Option<i64> = None;
        let mut last_sweep_ms: Option<i64> = None;

        timer.start_iter("filter reports", reports.len());
        for report in reports {
            timer.next();

            let target = match tracker.observe(report) {
                Ok(target) => target,
                Err(err) => {
                    warn!("Skipping report: {err}");
                    replay.skipped += 1;
                    continue;
                }
            };

            let now_ms = match (clock_ms, report.timestamp_ms) {
                (Some(clock), Some(t)) => clock.max(t),
                (None, Some(t)) => t,
                (Some(clock), None) => clock,
                (None, None) => 0,
            };
            clock_ms = Some(now_ms);

            let drawn = animations.drawn_position(&report.entity, now_ms);
            let superseded = animations.start(&report.entity, &target, now_ms).is_some();
            if superseded {
                replay.superseded += 1;
            }
            if target.extrapolated {
                replay.extrapolated += 1;
            }
            replay
                .rows
                .push(Row::new(report, &target, drawn, superseded));
            replay.tracks.push(report, &target);

            if last_sweep_ms
                .map(|t| now_ms - t >= SWEEP_EVERY_MS)
                .unwrap_or(true)
            {
                last_sweep_ms = Some(now_ms);
                for id in tracker.forget_stale(now_ms, forget_after) {
                    animations.remove(&id);
                }
            }
        }

        Ok(replay)
    }
}
