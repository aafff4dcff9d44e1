//! Linear algebra type system for the motion filters
//!
//! Provides compile-time dimension checking, clean type aliases
//! and the few checked matrix operations the filters rely on.

use nalgebra::{Cholesky, SMatrix, SVector};

use crate::error::{FilterError, FilterResult};

// ===== Fixed Sizes =====
pub type Vector1 = SVector<f64, 1>;
pub type Vector2 = SVector<f64, 2>;
pub type Vector3 = SVector<f64, 3>;
pub type Vector4 = SVector<f64, 4>;
pub type Vector6 = SVector<f64, 6>;

pub type Matrix1 = SMatrix<f64, 1, 1>;
pub type Matrix2 = SMatrix<f64, 2, 2>;
pub type Matrix3 = SMatrix<f64, 3, 3>;
pub type Matrix4 = SMatrix<f64, 4, 4>;
pub type Matrix6 = SMatrix<f64, 6, 6>;

// ===== State Dimensions =====
pub const POSITION_STATE_DIM: usize = 4; // [px, vx, py, vy]
pub const SPEED_STATE_DIM: usize = 6; // [px, vx, ax, py, vy, ay]
pub const DIRECTION_STATE_DIM: usize = 6; // [px, vx, py, vy, angle, angle_speed]
pub const ACCELERATION_STATE_DIM: usize = 9; // [px, vx, ax, py, vy, ay, angle, angle_speed, angle_r]
pub const ATTITUDE_ERROR_DIM: usize = 6; // [attitude error, gyro bias]

pub type PositionStateVec = SVector<f64, POSITION_STATE_DIM>;
pub type PositionStateMat = SMatrix<f64, POSITION_STATE_DIM, POSITION_STATE_DIM>;
pub type SpeedStateVec = SVector<f64, SPEED_STATE_DIM>;
pub type SpeedStateMat = SMatrix<f64, SPEED_STATE_DIM, SPEED_STATE_DIM>;
pub type DirectionStateVec = SVector<f64, DIRECTION_STATE_DIM>;
pub type DirectionStateMat = SMatrix<f64, DIRECTION_STATE_DIM, DIRECTION_STATE_DIM>;
pub type AccelerationStateVec = SVector<f64, ACCELERATION_STATE_DIM>;
pub type AccelerationStateMat = SMatrix<f64, ACCELERATION_STATE_DIM, ACCELERATION_STATE_DIM>;

// ===== Sigma Points (UKF) =====
pub const fn sigma_count(state_dim: usize) -> usize {
    2 * state_dim + 1
}

/// Inverse of a square matrix.
///
/// Sizes up to 3×3 use the closed-form adjugate; larger sizes go through
/// nalgebra's LU. A zero, negligible or non-finite determinant is reported
/// as `SingularMatrix` instead of producing garbage.
pub fn inverse<const N: usize>(m: &SMatrix<f64, N, N>) -> FilterResult<SMatrix<f64, N, N>> {
    let res = if N <= 3 {
        inverse_adjugate(m)?
    } else {
        m.try_inverse()
            .ok_or_else(|| FilterError::SingularMatrix(format!("{N}x{N} matrix is not invertible")))?
    };

    if !is_finite(&res) {
        return Err(FilterError::SingularMatrix(format!(
            "{N}x{N} matrix inverse is not finite"
        )));
    }
    Ok(res)
}

fn inverse_adjugate<const N: usize>(m: &SMatrix<f64, N, N>) -> FilterResult<SMatrix<f64, N, N>> {
    let adj = adjugate(m);
    let det: f64 = (0..N).map(|j| m[(0, j)] * adj[(j, 0)]).sum();
    let scale = m.amax().powi(N as i32);
    if !det.is_finite() || det == 0.0 || det.abs() <= f64::EPSILON * scale {
        return Err(FilterError::SingularMatrix(format!(
            "{N}x{N} matrix determinant {det:e}"
        )));
    }
    Ok(adj / det)
}

/// Cofactor transpose for N ≤ 3
fn adjugate<const N: usize>(m: &SMatrix<f64, N, N>) -> SMatrix<f64, N, N> {
    let mut res = SMatrix::<f64, N, N>::zeros();
    match N {
        1 => res[(0, 0)] = 1.0,
        2 => {
            res[(0, 0)] = m[(1, 1)];
            res[(0, 1)] = -m[(0, 1)];
            res[(1, 0)] = -m[(1, 0)];
            res[(1, 1)] = m[(0, 0)];
        }
        3 => {
            for r in 0..3 {
                for c in 0..3 {
                    // cofactor of (c, r)
                    let (r0, r1) = ((c + 1) % 3, (c + 2) % 3);
                    let (c0, c1) = ((r + 1) % 3, (r + 2) % 3);
                    res[(r, c)] = m[(r0, c0)] * m[(r1, c1)] - m[(r0, c1)] * m[(r1, c0)];
                }
            }
        }
        _ => {}
    }
    res
}

/// Places `NR / R` copies of `block` on the diagonal.
pub fn block_diagonal<const R: usize, const C: usize, const NR: usize, const NC: usize>(
    block: &SMatrix<f64, R, C>,
) -> SMatrix<f64, NR, NC> {
    const {
        assert!(R > 0 && C > 0 && NR % R == 0 && NC % C == 0 && NR / R == NC / C);
    }

    let mut res = SMatrix::<f64, NR, NC>::zeros();
    for k in 0..NR / R {
        res.fixed_view_mut::<R, C>(k * R, k * C).copy_from(block);
    }
    res
}

/// Places `K` square blocks on the diagonal in order.
pub fn block_diagonal_from<const B: usize, const K: usize, const N: usize>(
    blocks: &[SMatrix<f64, B, B>; K],
) -> SMatrix<f64, N, N> {
    const {
        assert!(B * K == N);
    }

    let mut res = SMatrix::<f64, N, N>::zeros();
    for (k, block) in blocks.iter().enumerate() {
        res.fixed_view_mut::<B, B>(k * B, k * B).copy_from(block);
    }
    res
}

/// Elements `OFFSET, OFFSET + STRIDE, ...` of `v`.
pub fn slice<const OFFSET: usize, const STRIDE: usize, const N: usize, const M: usize>(
    v: &SVector<f64, N>,
) -> SVector<f64, M> {
    const {
        assert!(M > 0 && STRIDE > 0 && OFFSET + STRIDE * (M - 1) < N);
    }

    SVector::<f64, M>::from_fn(|i, _| v[OFFSET + STRIDE * i])
}

/// Square sub-matrix taking rows and columns `OFFSET, OFFSET + STRIDE, ...`.
pub fn slice_matrix<const OFFSET: usize, const STRIDE: usize, const N: usize, const M: usize>(
    m: &SMatrix<f64, N, N>,
) -> SMatrix<f64, M, M> {
    const {
        assert!(M > 0 && STRIDE > 0 && OFFSET + STRIDE * (M - 1) < N);
    }

    SMatrix::<f64, M, M>::from_fn(|r, c| m[(OFFSET + STRIDE * r, OFFSET + STRIDE * c)])
}

pub fn make_diagonal<const N: usize>(v: &SVector<f64, N>) -> SMatrix<f64, N, N> {
    SMatrix::<f64, N, N>::from_diagonal(v)
}

pub fn is_finite<const R: usize, const C: usize>(m: &SMatrix<f64, R, C>) -> bool {
    m.iter().all(|v| v.is_finite())
}

pub fn symmetrize<const N: usize>(p: &SMatrix<f64, N, N>) -> SMatrix<f64, N, N> {
    (p + p.transpose()) * 0.5
}

/// Every entry must be finite and positive.
pub fn check_variance<const N: usize>(name: &str, variance: &SVector<f64, N>) -> FilterResult<()> {
    if variance.iter().all(|v| v.is_finite() && *v > 0.0) {
        Ok(())
    } else {
        Err(FilterError::InvalidArgument(format!(
            "{name} must be finite and positive: {:?}",
            variance.as_slice()
        )))
    }
}

pub fn check_vector<const N: usize>(name: &str, v: &SVector<f64, N>) -> FilterResult<()> {
    if is_finite(v) {
        Ok(())
    } else {
        Err(FilterError::InvalidArgument(format!(
            "{name} is not finite: {:?}",
            v.as_slice()
        )))
    }
}

/// Finite, symmetric and positive definite.
pub fn check_covariance<const N: usize>(name: &str, p: &SMatrix<f64, N, N>) -> FilterResult<()> {
    if !is_finite(p) {
        return Err(FilterError::InvalidArgument(format!("{name} is not finite")));
    }
    let tolerance = 1e-9 * p.amax().max(1.0);
    if (p - p.transpose()).amax() > tolerance {
        return Err(FilterError::InvalidArgument(format!("{name} is not symmetric")));
    }
    if Cholesky::new(*p).is_none() {
        return Err(FilterError::InvalidArgument(format!(
            "{name} is not positive definite"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_inverse<const N: usize>(m: SMatrix<f64, N, N>) {
        let inv = inverse(&m).unwrap();
        let identity = SMatrix::<f64, N, N>::identity();
        assert!((m * inv - identity).amax() < 1e-10 * N as f64);
        assert!((inv * m - identity).amax() < 1e-10 * N as f64);
    }

    #[test]
    fn test_inverse_small_sizes() {
        assert_inverse(Matrix1::new(4.0));
        assert_inverse(Matrix2::new(4.0, 1.0, 2.0, 3.0));
        assert_inverse(Matrix3::new(2.0, -1.0, 0.0, -1.0, 2.0, -1.0, 0.0, -1.0, 2.0));
        assert_inverse(Matrix3::new(0.0, 1.0, 2.0, 1.0, 0.0, 3.0, 4.0, -3.0, 8.0));
    }

    #[test]
    fn test_inverse_large_size() {
        let m = Matrix6::from_fn(|r, c| {
            if r == c {
                10.0 + r as f64
            } else {
                1.0 / (1.0 + r as f64 + c as f64)
            }
        });
        assert_inverse(m);
    }

    #[test]
    fn test_inverse_singular() {
        let m = Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 1.0, 0.0, 1.0);
        assert!(matches!(inverse(&m), Err(FilterError::SingularMatrix(_))));

        let m = Matrix6::zeros();
        assert!(matches!(inverse(&m), Err(FilterError::SingularMatrix(_))));
    }

    #[test]
    fn test_block_diagonal() {
        let block = Matrix2::new(1.0, 2.0, 3.0, 4.0);
        let m: Matrix6 = block_diagonal(&block);
        assert_eq!(m.fixed_view::<2, 2>(0, 0), block);
        assert_eq!(m.fixed_view::<2, 2>(2, 2), block);
        assert_eq!(m.fixed_view::<2, 2>(4, 4), block);
        assert_eq!(m[(0, 2)], 0.0);
        assert_eq!(m[(5, 0)], 0.0);

        let column = SMatrix::<f64, 3, 1>::new(1.0, 2.0, 3.0);
        let g: SMatrix<f64, 6, 2> = block_diagonal(&column);
        assert_eq!(g[(2, 0)], 3.0);
        assert_eq!(g[(3, 1)], 1.0);
        assert_eq!(g[(3, 0)], 0.0);
    }

    #[test]
    fn test_block_diagonal_from() {
        let a = Matrix2::identity();
        let b = Matrix2::new(5.0, 6.0, 7.0, 8.0);
        let m: Matrix4 = block_diagonal_from(&[a, b]);
        assert_eq!(m[(0, 0)], 1.0);
        assert_eq!(m[(2, 3)], 6.0);
        assert_eq!(m[(3, 2)], 7.0);
        assert_eq!(m[(0, 3)], 0.0);
    }

    #[test]
    fn test_slice() {
        let v = Vector6::new(0.0, 1.0, 2.0, 3.0, 4.0, 5.0);
        let position: Vector2 = slice::<0, 3, 6, 2>(&v);
        assert_eq!(position, Vector2::new(0.0, 3.0));
        let velocity: Vector3 = slice::<1, 2, 6, 3>(&v);
        assert_eq!(velocity, Vector3::new(1.0, 3.0, 5.0));

        let m = Matrix4::from_fn(|r, c| (10 * r + c) as f64);
        let sub: Matrix2 = slice_matrix::<1, 2, 4, 2>(&m);
        assert_eq!(sub, Matrix2::new(11.0, 13.0, 31.0, 33.0));
    }

    #[test]
    fn test_checks() {
        assert!(check_variance("v", &Vector2::new(1.0, 0.1)).is_ok());
        assert!(check_variance("v", &Vector2::new(1.0, 0.0)).is_err());
        assert!(check_covariance("p", &Matrix2::new(2.0, 0.5, 0.5, 1.0)).is_ok());
        assert!(check_covariance("p", &Matrix2::new(1.0, 2.0, 2.0, 1.0)).is_err());
        assert!(check_covariance("p", &Matrix2::new(1.0, 0.5, 0.0, 1.0)).is_err());
        assert!(check_vector("x", &Vector2::new(f64::NAN, 0.0)).is_err());
    }

    #[test]
    fn test_symmetrize() {
        let p = Matrix2::new(1.0, 2.0, 4.0, 1.0);
        let s = symmetrize(&p);
        assert_relative_eq!(s[(0, 1)], 3.0);
        assert_relative_eq!(s[(1, 0)], 3.0);
    }
}
