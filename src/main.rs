use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, warn};

use motion_filter_rs::config::{FilterConfig, SimulationConfig};
use motion_filter_rs::filters::{MotionFilter, TrackPoint, Tracker, TrackerSettings};
use motion_filter_rs::output::{
    decimate, write_measurements, write_summary, write_track, write_truth, FilterSummary,
    RunSummary,
};
use motion_filter_rs::simulator::Simulator;
use motion_filter_rs::types::Measurements;
use motion_filter_rs::FilterResult;

#[derive(Parser, Debug)]
#[command(name = "motion_filter")]
#[command(
    about = "Simulate a planar track and run the position, speed, direction and acceleration filters",
    long_about = None
)]
struct Args {
    /// JSON simulation config; missing fields take defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Track duration in seconds
    #[arg(long)]
    duration: Option<f64>,

    /// NIS gate for measurement updates
    #[arg(long)]
    gate: Option<f64>,

    /// Output directory
    #[arg(long, default_value = "motion_filter_output")]
    output_dir: PathBuf,
}

struct TrackResult {
    points: Vec<TrackPoint>,
    summary: FilterSummary,
}

fn track<F: MotionFilter>(
    filter: F,
    settings: TrackerSettings,
    samples: &[Measurements],
) -> FilterResult<TrackResult> {
    let mut tracker = Tracker::new(filter, settings)?;
    let mut points = Vec::with_capacity(samples.len());
    for sample in samples {
        let point = match tracker.update(sample) {
            Ok(Some(point)) => Some(point),
            Ok(None) if !tracker.is_empty() => {
                tracker.predict_only(sample.time, sample.truth.as_ref())?
            }
            Ok(None) => None,
            Err(e) => {
                warn!("{} filter skipped sample at {:.3}: {e}", tracker.name(), sample.time);
                None
            }
        };
        points.extend(point);
    }
    info!("{}", tracker.consistency_summary());

    let summary = FilterSummary::new(&tracker, points.len());
    Ok(TrackResult { points, summary })
}

fn run_trackers(config: &FilterConfig, samples: &[Measurements]) -> Result<Vec<TrackResult>> {
    let position = config.position_filter().context("position filter")?;
    let speed = config.speed_filter().context("speed filter")?;
    let direction = config.direction_filter().context("direction filter")?;
    let [ekf, ukf] = config.acceleration_cores();
    let acceleration_ekf = config.acceleration_filter(ekf).context("acceleration EKF filter")?;
    let acceleration_ukf = config.acceleration_filter(ukf).context("acceleration UKF filter")?;
    let settings = config.tracker;

    let joined = crossbeam::scope(|scope| {
        let handles = [
            scope.spawn(move |_| track(position, settings, samples)),
            scope.spawn(move |_| track(speed, settings, samples)),
            scope.spawn(move |_| track(direction, settings, samples)),
            scope.spawn(move |_| track(acceleration_ekf, settings, samples)),
            scope.spawn(move |_| track(acceleration_ukf, settings, samples)),
        ];
        handles.map(|handle| handle.join())
    })
    .map_err(|_| anyhow!("tracker scope panicked"))?;

    let mut results = Vec::with_capacity(joined.len());
    for result in joined {
        let result = result
            .map_err(|_| anyhow!("tracker thread panicked"))?
            .context("tracking failed")?;
        results.push(result);
    }
    Ok(results)
}

fn write_file(
    dir: &Path,
    name: &str,
    write: impl FnOnce(&mut BufWriter<File>) -> FilterResult<()>,
) -> Result<()> {
    let path = dir.join(name);
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer).with_context(|| format!("writing {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("writing {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimulationConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SimulationConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(duration) = args.duration {
        config.duration = duration;
    }
    if args.gate.is_some() {
        config.filter.tracker.gate = args.gate;
    }
    config.check().context("invalid configuration")?;

    info!(
        "Simulating {} s at dt {} s, seed {}",
        config.duration, config.dt, config.seed
    );
    let samples = Simulator::new(config.clone())?.run();
    info!("{} samples", samples.len());

    let results = run_trackers(&config.filter, &samples)?;

    let dir = &args.output_dir;
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    write_file(dir, "truth.txt", |w| write_truth(w, &samples))?;
    write_file(dir, "measurements.txt", |w| write_measurements(w, &samples))?;
    for result in &results {
        let name = format!("track_{}.txt", result.summary.name);
        let points = decimate(&result.points, config.output_interval);
        write_file(dir, &name, |w| write_track(w, points))?;
    }

    let summary = RunSummary {
        seed: config.seed,
        duration: config.duration,
        samples: samples.len(),
        filters: results.into_iter().map(|r| r.summary).collect(),
    };
    write_file(dir, "summary.json", |w| write_summary(w, &summary))?;
    info!("Results written to {}", dir.display());
    Ok(())
}
