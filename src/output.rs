//! Plain-text result files and the JSON run summary
//!
//! Row files hold one sample per line, columns separated by a space.

use std::io::{BufRead, Write};

use serde::Serialize;

use crate::error::{FilterError, FilterResult};
use crate::filters::{MotionFilter, NormalizedSquared, TrackPoint, Tracker};
use crate::types::Measurements;

/// Keeps the first point and then every point at least `interval` after
/// the previously kept one.
pub fn decimate(points: &[TrackPoint], interval: f64) -> Vec<&TrackPoint> {
    let mut kept: Vec<&TrackPoint> = Vec::new();
    for point in points {
        match kept.last() {
            Some(last) if point.time - last.time < interval => {}
            _ => kept.push(point),
        }
    }
    kept
}

fn write_row<W: Write>(writer: &mut W, values: &[f64]) -> FilterResult<()> {
    let row: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    writeln!(writer, "{}", row.join(" "))?;
    Ok(())
}

/// `time x y` per filter output
pub fn write_track<'a, W: Write>(
    writer: &mut W,
    points: impl IntoIterator<Item = &'a TrackPoint>,
) -> FilterResult<()> {
    for point in points {
        write_row(writer, &[point.time, point.position.0, point.position.1])?;
    }
    Ok(())
}

/// `time x y` per true position
pub fn write_truth<W: Write>(writer: &mut W, samples: &[Measurements]) -> FilterResult<()> {
    for sample in samples {
        if let Some(truth) = &sample.truth {
            write_row(writer, &[sample.time, truth.position.x, truth.position.y])?;
        }
    }
    Ok(())
}

/// `time x y` per position measurement
pub fn write_measurements<W: Write>(writer: &mut W, samples: &[Measurements]) -> FilterResult<()> {
    for sample in samples {
        if let Some(position) = &sample.position {
            write_row(writer, &[sample.time, position.value.x, position.value.y])?;
        }
    }
    Ok(())
}

/// `tau deviation` rows
pub fn write_deviation<W: Write>(writer: &mut W, rows: &[(f64, f64)]) -> FilterResult<()> {
    for &(tau, deviation) in rows {
        write_row(writer, &[tau, deviation])?;
    }
    Ok(())
}

/// Reads the last column of every non-empty line. Lines starting with `#`
/// are comments.
pub fn read_samples<R: BufRead>(reader: R) -> FilterResult<Vec<f64>> {
    let mut samples = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(column) = line.split_whitespace().last() else {
            continue;
        };
        let value = column.parse::<f64>().map_err(|e| {
            FilterError::InvalidArgument(format!("line {}: {column:?}: {e}", number + 1))
        })?;
        samples.push(value);
    }
    Ok(samples)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConsistencySummary {
    pub average: Option<f64>,
    pub average_per_sample: Option<f64>,
    pub samples: usize,
}

impl From<&NormalizedSquared> for ConsistencySummary {
    fn from(value: &NormalizedSquared) -> Self {
        Self {
            average: value.average().ok(),
            average_per_sample: value.average_per_sample().ok(),
            samples: value.count(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilterSummary {
    pub name: String,
    pub points: usize,
    pub resets: usize,
    pub gated: usize,
    pub nees_position: ConsistencySummary,
    pub nees_speed: ConsistencySummary,
    pub nis: ConsistencySummary,
}

impl FilterSummary {
    pub fn new<F: MotionFilter>(tracker: &Tracker<F>, points: usize) -> Self {
        Self {
            name: tracker.name().to_string(),
            points,
            resets: tracker.reset_count(),
            gated: tracker.gated_count(),
            nees_position: tracker.nees_position().into(),
            nees_speed: tracker.nees_speed().into(),
            nis: tracker.nis().into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub seed: u64,
    pub duration: f64,
    pub samples: usize,
    pub filters: Vec<FilterSummary>,
}

pub fn write_summary<W: Write>(writer: &mut W, summary: &RunSummary) -> FilterResult<()> {
    serde_json::to_writer_pretty(&mut *writer, summary)?;
    writeln!(writer)?;
    Ok(())
}
