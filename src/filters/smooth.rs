//! Rauch-Tung-Striebel smoothing of recorded EKF steps
//!
//! `predictions[k]` is the prediction from step `k` to step `k + 1`: the
//! transition Jacobian `F` and the predicted `x⁻`, `P⁻`. `x[k]`, `p[k]`
//! are the filtered moments after the update at step `k`.
//!
//! ```text
//! G  = P[k]·Fᵀ·(P⁻)⁻¹
//! xs = x[k] + G·(xs[k+1] − x⁻)
//! Ps = P[k] + G·(Ps[k+1] − P⁻)·Gᵀ
//! ```

use nalgebra::{SMatrix, SVector};

use crate::error::{FilterError, FilterResult};
use crate::types::linalg::{inverse, symmetrize};

/// Time update recorded by [`crate::filters::Ekf::predict_recorded`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction<const N: usize> {
    /// Transition Jacobian
    pub f: SMatrix<f64, N, N>,
    pub x: SVector<f64, N>,
    pub p: SMatrix<f64, N, N>,
}

/// Filtered step; `prediction` is `None` after a reset
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Step<const N: usize> {
    pub prediction: Option<Prediction<N>>,
    pub x: SVector<f64, N>,
    pub p: SMatrix<f64, N, N>,
}

pub type Smoothed<const N: usize> = (SVector<f64, N>, SMatrix<f64, N, N>);

fn check_lengths(predictions: usize, x: usize, p: usize) -> FilterResult<()> {
    if x == 0 {
        return Err(FilterError::InvalidArgument("nothing to smooth".to_string()));
    }
    if p != x || predictions + 1 != x {
        return Err(FilterError::InvalidArgument(format!(
            "{predictions} predictions, {x} states and {p} covariances"
        )));
    }
    Ok(())
}

fn smooth_step<const N: usize>(
    prediction: &Prediction<N>,
    x: &SVector<f64, N>,
    p: &SMatrix<f64, N, N>,
    next: &Smoothed<N>,
) -> FilterResult<Smoothed<N>> {
    let gain = p * prediction.f.transpose() * inverse(&prediction.p)?;
    let xs = x + gain * (next.0 - prediction.x);
    let ps = symmetrize(&(p + gain * (next.1 - prediction.p) * gain.transpose()));
    Ok((xs, ps))
}

/// Smoothed moments of every step.
pub fn smooth_all<const N: usize>(
    predictions: &[Prediction<N>],
    x: &[SVector<f64, N>],
    p: &[SMatrix<f64, N, N>],
) -> FilterResult<(Vec<SVector<f64, N>>, Vec<SMatrix<f64, N, N>>)> {
    check_lengths(predictions.len(), x.len(), p.len())?;

    let mut xs = x.to_vec();
    let mut ps = p.to_vec();
    for k in (0..predictions.len()).rev() {
        let (sx, sp) = smooth_step(&predictions[k], &x[k], &p[k], &(xs[k + 1], ps[k + 1]))?;
        xs[k] = sx;
        ps[k] = sp;
    }
    Ok((xs, ps))
}

/// Smoothed moments of the first step only.
pub fn smooth_first<const N: usize>(
    predictions: &[Prediction<N>],
    x: &[SVector<f64, N>],
    p: &[SMatrix<f64, N, N>],
) -> FilterResult<Smoothed<N>> {
    check_lengths(predictions.len(), x.len(), p.len())?;

    let last = predictions.len();
    let mut res = (x[last], p[last]);
    for k in (0..last).rev() {
        res = smooth_step(&predictions[k], &x[k], &p[k], &res)?;
    }
    Ok(res)
}

/// Runs of steps between resets. The first step always starts a run.
fn runs<const N: usize>(steps: &[Step<N>]) -> Vec<&[Step<N>]> {
    let mut res = Vec::new();
    let mut start = 0;
    for (i, step) in steps.iter().enumerate().skip(1) {
        if step.prediction.is_none() {
            res.push(&steps[start..i]);
            start = i;
        }
    }
    if start < steps.len() {
        res.push(&steps[start..]);
    }
    res
}

fn split<const N: usize>(
    run: &[Step<N>],
) -> FilterResult<(Vec<Prediction<N>>, Vec<SVector<f64, N>>, Vec<SMatrix<f64, N, N>>)> {
    let predictions = run
        .iter()
        .skip(1)
        .map(|step| {
            step.prediction.ok_or_else(|| {
                FilterError::InvalidArgument("missing prediction inside a run".to_string())
            })
        })
        .collect::<FilterResult<Vec<_>>>()?;
    let x = run.iter().map(|step| step.x).collect();
    let p = run.iter().map(|step| step.p).collect();
    Ok((predictions, x, p))
}

/// Fixed-interval smoothing of every run between resets.
pub fn smooth_steps<const N: usize>(steps: &[Step<N>]) -> FilterResult<Vec<Smoothed<N>>> {
    let mut res = Vec::with_capacity(steps.len());
    for run in runs(steps) {
        let (predictions, x, p) = split(run)?;
        let (xs, ps) = smooth_all(&predictions, &x, &p)?;
        res.extend(xs.into_iter().zip(ps));
    }
    Ok(res)
}

/// Fixed-lag smoothing: each step uses at most `lag` later steps of its
/// run. `lag = 0` returns the filtered moments.
pub fn smooth_lag<const N: usize>(
    steps: &[Step<N>],
    lag: usize,
) -> FilterResult<Vec<Smoothed<N>>> {
    if lag == 0 {
        return Ok(steps.iter().map(|step| (step.x, step.p)).collect());
    }

    let mut res = Vec::with_capacity(steps.len());
    for run in runs(steps) {
        let (predictions, x, p) = split(run)?;
        for k in 0..run.len() {
            let end = (k + lag).min(run.len() - 1);
            res.push(smooth_first(&predictions[k..end], &x[k..=end], &p[k..=end])?);
        }
    }
    Ok(res)
}
