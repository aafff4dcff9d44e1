use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use motion_filter_rs::allan::{allan_deviation, cluster_times};
use motion_filter_rs::output::{read_samples, write_deviation};

#[derive(Parser, Debug)]
#[command(about = "Overlapping Allan deviation of a rate samples file", long_about = None)]
struct Args {
    /// Samples file, one rate per line (last column is used)
    #[arg(long)]
    input: PathBuf,

    /// Output file of `tau deviation` rows
    #[arg(long, default_value = "allan.txt")]
    output: PathBuf,

    /// Sample period in seconds
    #[arg(long, default_value = "0.01")]
    sample_period: f64,

    /// Number of log-spaced cluster times
    #[arg(long, default_value = "100")]
    points: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let file = File::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let samples = read_samples(BufReader::new(file))
        .with_context(|| format!("reading {}", args.input.display()))?;
    info!("{} samples from {}", samples.len(), args.input.display());

    let taus = cluster_times(samples.len(), args.sample_period, args.points)
        .context("too few samples for Allan deviation")?;
    let rows = allan_deviation(&samples, args.sample_period, &taus)?;

    let file = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let mut writer = BufWriter::new(file);
    write_deviation(&mut writer, &rows)?;
    writer.flush()?;

    if let Some((tau, deviation)) = rows
        .iter()
        .min_by(|a, b| a.1.total_cmp(&b.1))
    {
        info!("Minimum deviation {deviation:.6} at tau {tau:.3} s");
    }
    info!("{} rows written to {}", rows.len(), args.output.display());
    Ok(())
}
