//! Closed-form cofactor helpers for symmetric 3×3 matrices

use crate::types::linalg::Matrix3;

/// Adjugate of a symmetric 3×3 matrix
pub fn adjoint_symmetric(m: &Matrix3) -> Matrix3 {
    let a00 = m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(1, 2)];
    let a01 = m[(0, 2)] * m[(1, 2)] - m[(0, 1)] * m[(2, 2)];
    let a02 = m[(0, 1)] * m[(1, 2)] - m[(0, 2)] * m[(1, 1)];
    let a11 = m[(0, 0)] * m[(2, 2)] - m[(0, 2)] * m[(0, 2)];
    let a12 = m[(0, 1)] * m[(0, 2)] - m[(0, 0)] * m[(1, 2)];
    let a22 = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(0, 1)];

    Matrix3::new(
        a00, a01, a02, //
        a01, a11, a12, //
        a02, a12, a22,
    )
}

/// Determinant by expansion along the first row, reusing the adjugate
pub fn determinant(m: &Matrix3, adjoint: &Matrix3) -> f64 {
    m[(0, 0)] * adjoint[(0, 0)] + m[(0, 1)] * adjoint[(1, 0)] + m[(0, 2)] * adjoint[(2, 0)]
}
