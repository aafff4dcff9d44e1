//! Process noise models for kinematic state transitions
//!
//! A chain of D integrators driven by white noise (D = 1 velocity,
//! 2 acceleration, 3 jerk) gets its D×D process covariance either from
//! the exact continuous-time integral or from a discrete per-step impulse.

use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

use crate::error::{check_non_negative, FilterResult};
use crate::types::linalg::{block_diagonal, make_diagonal};

/// Noise model chosen when a filter is built
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoiseModel {
    /// Continuous white noise [units²/s per order]
    Continuous { spectral_density: f64 },
    /// Discrete noise injected once per step
    Discrete { variance: f64 },
}

impl NoiseModel {
    pub fn check(&self) -> FilterResult<()> {
        match *self {
            NoiseModel::Continuous { spectral_density } => {
                check_non_negative("spectral density", spectral_density)
            }
            NoiseModel::Discrete { variance } => check_non_negative("noise variance", variance),
        }
    }

    /// D×D covariance block for one axis over `dt`.
    pub fn covariance<const D: usize>(&self, dt: f64) -> FilterResult<SMatrix<f64, D, D>> {
        match *self {
            NoiseModel::Continuous { spectral_density } => {
                continuous_white_noise::<D>(dt, spectral_density)
            }
            NoiseModel::Discrete { variance } => discrete_white_noise::<D>(dt, variance),
        }
    }
}

impl Default for NoiseModel {
    fn default() -> Self {
        NoiseModel::Continuous {
            spectral_density: 1.0,
        }
    }
}

fn factorial(n: usize) -> f64 {
    (1..=n).map(|k| k as f64).product()
}

/// Exact covariance of a D-integrator chain under continuous white noise.
///
/// Entry `(i, j)` is `q·dt^(a+b+1) / (a!·b!·(a+b+1))` with `a = D-1-i`,
/// `b = D-1-j`. For D = 2 this is `[[dt³/3, dt²/2], [dt²/2, dt]]·q`.
pub fn continuous_white_noise<const D: usize>(
    dt: f64,
    spectral_density: f64,
) -> FilterResult<SMatrix<f64, D, D>> {
    check_non_negative("dt", dt)?;
    check_non_negative("spectral density", spectral_density)?;

    Ok(SMatrix::<f64, D, D>::from_fn(|i, j| {
        let a = D - 1 - i;
        let b = D - 1 - j;
        let n = a + b + 1;
        spectral_density * dt.powi(n as i32) / (factorial(a) * factorial(b) * n as f64)
    }))
}

/// Noise transition `[dt^D/D!, ..., dt²/2, dt]`
pub fn noise_transition<const D: usize>(dt: f64) -> SVector<f64, D> {
    SVector::<f64, D>::from_fn(|i, _| {
        let n = D - i;
        dt.powi(n as i32) / factorial(n)
    })
}

/// `G·Gᵀ·variance` with `G` from [`noise_transition`].
pub fn discrete_white_noise<const D: usize>(
    dt: f64,
    variance: f64,
) -> FilterResult<SMatrix<f64, D, D>> {
    check_non_negative("dt", dt)?;
    check_non_negative("noise variance", variance)?;

    let g = noise_transition::<D>(dt);
    Ok(g * g.transpose() * variance)
}

/// Discrete noise for `K` independent axes of order `D` (`N = D·K`),
/// one variance per axis: `G·diag(variance)·Gᵀ`.
pub fn discrete_white_noise_axes<const D: usize, const K: usize, const N: usize>(
    dt: f64,
    variance: &SVector<f64, K>,
) -> FilterResult<SMatrix<f64, N, N>> {
    check_non_negative("dt", dt)?;
    for v in variance.iter() {
        check_non_negative("noise variance", *v)?;
    }

    let g: SMatrix<f64, N, K> = block_diagonal(&noise_transition::<D>(dt));
    Ok(g * make_diagonal(variance) * g.transpose())
}
