use nalgebra::{SMatrix, SVector};

/// Measurement model `z = h(x)` of an N-state filter
pub trait Observation<const N: usize, const M: usize> {
    fn h(&self, x: &SVector<f64, N>) -> SVector<f64, M>;

    /// `a - b`; angle components must be wrapped
    fn residual(&self, a: &SVector<f64, M>, b: &SVector<f64, M>) -> SVector<f64, M> {
        a - b
    }

    /// Weighted mean of predicted measurements (unscented transform)
    fn mean(&self, points: &[SVector<f64, M>], weights: &[f64]) -> SVector<f64, M> {
        weighted_mean(points, weights)
    }
}

/// Measurement model with a Jacobian for the EKF
pub trait Linearized<const N: usize, const M: usize>: Observation<N, M> {
    fn jacobian(&self, x: &SVector<f64, N>) -> SMatrix<f64, M, N>;
}

pub fn weighted_mean<const M: usize>(points: &[SVector<f64, M>], weights: &[f64]) -> SVector<f64, M> {
    points
        .iter()
        .zip(weights)
        .fold(SVector::<f64, M>::zeros(), |acc, (point, weight)| acc + point * *weight)
}

/// Plain vector addition for states without angle components
pub fn add_x<const N: usize>(a: &SVector<f64, N>, b: &SVector<f64, N>) -> SVector<f64, N> {
    a + b
}

/// State addition, difference and mean used by the unscented transform.
/// States with angle components override these to wrap.
pub trait StateSpace<const N: usize> {
    fn add(&self, a: &SVector<f64, N>, b: &SVector<f64, N>) -> SVector<f64, N> {
        a + b
    }

    fn subtract(&self, a: &SVector<f64, N>, b: &SVector<f64, N>) -> SVector<f64, N> {
        a - b
    }

    fn mean(&self, points: &[SVector<f64, N>], weights: &[f64]) -> SVector<f64, N> {
        weighted_mean(points, weights)
    }
}

/// Plain vector space
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Euclidean;

impl<const N: usize> StateSpace<N> for Euclidean {}
