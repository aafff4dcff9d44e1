//! Overlapping Allan deviation of rate samples

use ndarray::{s, Array1};

use crate::error::{check_positive, FilterError, FilterResult};

/// `count` points from `from` to `to`, evenly spaced in logarithm.
pub fn log_space(from: f64, to: f64, count: usize) -> FilterResult<Vec<f64>> {
    check_positive("from", from)?;
    check_positive("to", to)?;
    if from >= to {
        return Err(FilterError::InvalidArgument(format!(
            "log space bounds must increase; from {from} to {to}"
        )));
    }
    if count < 2 {
        return Err(FilterError::InvalidArgument(format!(
            "log space needs at least 2 points: {count}"
        )));
    }

    let ratio = to / from;
    let last = (count - 1) as f64;
    Ok((0..count)
        .map(|i| from * ratio.powf(i as f64 / last))
        .collect())
}

/// Cluster times from one sample period up to the longest usable one.
pub fn cluster_times(sample_count: usize, sample_period: f64, count: usize) -> FilterResult<Vec<f64>> {
    let max_cluster = sample_count / 2;
    if max_cluster < 2 {
        return Err(FilterError::NoData);
    }
    log_space(sample_period, sample_period * max_cluster as f64, count)
}

/// Returns `(tau, deviation)` for every distinct cluster size that fits
/// into the samples. Cluster times are rounded to whole sample periods.
pub fn allan_deviation(
    samples: &[f64],
    sample_period: f64,
    cluster_times: &[f64],
) -> FilterResult<Vec<(f64, f64)>> {
    check_positive("sample period", sample_period)?;
    if samples.len() < 2 {
        return Err(FilterError::NoData);
    }
    if let Some(bad) = samples.iter().find(|v| !v.is_finite()) {
        return Err(FilterError::InvalidArgument(format!("sample is not finite: {bad}")));
    }

    // integral of the rate, theta[0] = 0
    let mut theta = Array1::<f64>::zeros(samples.len() + 1);
    for (i, v) in samples.iter().enumerate() {
        theta[i + 1] = theta[i] + v * sample_period;
    }
    let n = theta.len();

    let mut res = Vec::with_capacity(cluster_times.len());
    let mut last_m = 0;
    for &tau in cluster_times {
        let m = (tau / sample_period).round() as usize;
        if m == 0 || m == last_m || 2 * m >= n {
            continue;
        }
        last_m = m;

        let twice = &theta.slice(s![m..n - m]) * 2.0;
        let d = &(&theta.slice(s![2 * m..]) - &twice) + &theta.slice(s![..n - 2 * m]);
        let tau = m as f64 * sample_period;
        let variance = d.mapv(|v| v * v).sum() / (2.0 * tau * tau * (n - 2 * m) as f64);
        res.push((tau, variance.sqrt()));
    }

    if res.is_empty() {
        return Err(FilterError::NoData);
    }
    Ok(res)
}
