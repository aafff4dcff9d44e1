//! QUEST attitude estimate from any number of vector observations
//!
//! Weights are inverse standard deviations; they are squared and scaled
//! to sum to one. The largest eigenvalue of Davenport's matrix comes in
//! closed form for two observations and from Newton's method on the
//! characteristic polynomial otherwise.

use crate::attitude::quaternion::Quaternion;
use crate::error::{FilterError, FilterResult};
use crate::types::linalg::{Matrix3, Vector3};

use super::adjoint::{adjoint_symmetric, determinant};
use super::polynomial::CharacteristicPolynomial;

const NEWTON_ACCURACY: f64 = 1e-5;
const NEWTON_MAX_ITERATIONS: usize = 15;

fn normalize_all(name: &str, vectors: &[Vector3]) -> FilterResult<Vec<Vector3>> {
    vectors
        .iter()
        .map(|v| {
            v.try_normalize(f64::MIN_POSITIVE)
                .ok_or_else(|| FilterError::DegenerateInput(format!("zero {name} vector")))
        })
        .collect()
}

fn normalize_weights(weights: &[f64]) -> FilterResult<Vec<f64>> {
    if weights.iter().any(|w| !(w.is_finite() && *w > 0.0)) {
        return Err(FilterError::InvalidArgument(format!(
            "weights must be finite and positive: {weights:?}"
        )));
    }
    let squares: Vec<f64> = weights.iter().map(|w| w * w).collect();
    let sum: f64 = squares.iter().sum();
    Ok(squares.into_iter().map(|w| w / sum).collect())
}

fn largest_eigenvalue_two(
    observations: &[Vector3],
    references: &[Vector3],
    weights: &[f64],
) -> f64 {
    let (o0, o1) = (&observations[0], &observations[1]);
    let (r0, r1) = (&references[0], &references[1]);

    let cos = r0.dot(r1) * o0.dot(o1) + r0.cross(r1).norm() * o0.cross(o1).norm();
    let (a0, a1) = (weights[0], weights[1]);
    (a0 * a0 + 2.0 * a0 * a1 * cos + a1 * a1).sqrt()
}

fn largest_eigenvalue(s: &Matrix3, z: &Vector3, sigma: f64) -> FilterResult<f64> {
    let kappa = adjoint_symmetric(s).trace();
    let delta = s.determinant();
    let sz = s * z;

    let a = sigma * sigma - kappa;
    let b = sigma * sigma + z.dot(z);
    let c = delta + z.dot(&sz);
    let d = z.dot(&(s * sz));

    let polynomial = CharacteristicPolynomial::new(-a - b, -c, a * b + c * sigma - d);
    polynomial
        .newton_raphson(1.0, NEWTON_ACCURACY, NEWTON_MAX_ITERATIONS)
        .ok_or_else(|| FilterError::NoConvergence(format!("largest eigenvalue of {polynomial}")))
}

/// Optimal attitude `q` with `q.rotate_vector(observation) ≈ reference`.
pub fn quest(
    observations: &[Vector3],
    references: &[Vector3],
    weights: &[f64],
) -> FilterResult<Quaternion> {
    if observations.len() != references.len() || observations.len() != weights.len() {
        return Err(FilterError::InvalidArgument(format!(
            "observation count {}, reference count {}, weight count {}",
            observations.len(),
            references.len(),
            weights.len()
        )));
    }
    if observations.len() < 2 {
        return Err(FilterError::InvalidArgument(format!(
            "at least 2 vector pairs required, {} given",
            observations.len()
        )));
    }

    let observations = normalize_all("observation", observations)?;
    let references = normalize_all("reference", references)?;
    let weights = normalize_weights(weights)?;

    let b: Matrix3 = observations
        .iter()
        .zip(&references)
        .zip(&weights)
        .map(|((o, r), w)| o * r.transpose() * *w)
        .sum();

    let sigma = b.trace();
    let s = b + b.transpose();
    let z = Vector3::new(
        b[(1, 2)] - b[(2, 1)],
        b[(2, 0)] - b[(0, 2)],
        b[(0, 1)] - b[(1, 0)],
    );

    let lambda = if observations.len() == 2 {
        largest_eigenvalue_two(&observations, &references, &weights)
    } else {
        largest_eigenvalue(&s, &z, sigma)?
    };

    let m = Matrix3::identity() * (lambda + sigma) - s;
    let m_adjoint = adjoint_symmetric(&m);
    let m_determinant = determinant(&m, &m_adjoint);

    Quaternion::from_parts(m_determinant, m_adjoint * z)
        .try_normalized()
        .ok_or_else(|| {
            FilterError::DegenerateInput("attitude near 180 degrees or collinear vectors".into())
        })
}
